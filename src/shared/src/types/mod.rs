//! Shared type definitions for the Newsroom platform

pub mod events;

pub use events::{
    ArticleLiked, ArticlePublished, CommentCreated, EmailVerified, EventEnvelope, EventError,
    ReporterFollowed, UserProfile, UserRegistered,
};
