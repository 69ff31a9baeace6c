// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Data models for the application.

pub mod license;
pub mod plan;
pub mod subscription;
pub mod user;

pub use license::License;
pub use plan::Plan;
pub use subscription::{Subscription, SubscriptionStatus};
pub use user::User;
