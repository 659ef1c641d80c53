//! 类型系统模块：定义请求、响应与错误分类等核心数据类型。
//!
//! # Types Module
//!
//! This module defines the data model shared by every layer of the
//! orchestration core: the immutable [`Request`] handed to an adapter, the
//! [`Response`] it produces, and the closed error taxonomy ([`ErrorKind`])
//! used to represent backend failures as data rather than control flow.
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Request`] | One generation request for one backend/model pair |
//! | [`GenerationParams`] | Sampling parameters (temperature, max tokens) |
//! | [`Response`] | Uniform result of one adapter call, success or failure |
//! | [`ErrorInfo`] | Classified failure attached to a failed [`Response`] |
//! | [`ErrorKind`] | Failure taxonomy with retry semantics |
//!
//! ## Example
//!
//! ```rust
//! use omni_orchestrator::types::{GenerationParams, Request};
//!
//! let request = Request::new(
//!     "Write a Dockerfile for a Node.js service",
//!     "openai",
//!     "gpt-4o",
//!     GenerationParams::new(0.2, 1024),
//! );
//! assert_eq!(request.backend_id, "openai");
//! ```

pub mod request;
pub mod response;

pub use request::{GenerationParams, Request};
pub use response::{ErrorInfo, ErrorKind, Response};
