pub mod achievements;
pub mod ads;
pub mod habits;
pub mod payments;
pub mod progress;
pub mod referrals;
pub mod streak;
pub mod subscription;
pub mod tinkoff;

#[cfg(test)]
pub(crate) mod test_support;
