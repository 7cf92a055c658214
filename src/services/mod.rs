pub mod bundle;
pub mod converter;
pub mod janitor;
pub mod scratch;
