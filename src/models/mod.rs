pub mod achievement;
pub mod ad;
pub mod habit;
pub mod habit_log;
pub mod payment;
pub mod referral;
pub mod user;
