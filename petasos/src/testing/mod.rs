//! Testing utilities for code built on petasos.
//!
//! This module provides:
//! - Job card and unit-of-work builders
//! - An engine fixture wired to collecting sinks

mod fixtures;

pub use fixtures::{job_card_for, upstream_job_card, uow_for_episode, TestEngine};
