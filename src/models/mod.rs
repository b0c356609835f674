//! Entity models for the aggregation pipeline

pub mod article;
pub mod source;

pub use article::{Article, ImportanceLevel, NewArticle, Topic};
pub use source::NewsSource;
