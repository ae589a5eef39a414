//! # CC Test Utilities
//!
//! Shared test utilities for the Conference Controller.
//!
//! Provides mock seams and fixtures so the controller can be exercised
//! end to end without real object storage, mail transport or wall time.
//!
//! ## Modules
//!
//! - `fixtures` - Config, clock, schedule requests and a fully wired [`TestApp`]
//! - `mock_storage` - [`FlakyObjectStore`] with scripted upload failures
//! - `mock_invitations` - [`RecordingInvitationSender`] that captures deliveries
//! - `http` - One-shot JSON request helpers for the router
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cc_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let app = TestApp::builder().build();
//!     let request = ScheduleRequestBuilder::new(app.now() + Duration::hours(1)).build();
//!
//!     let (status, body) = app.post("/v1/sessions", &request).await;
//!     assert_eq!(status, StatusCode::CREATED);
//! }
//! ```

pub mod fixtures;
pub mod http;
pub mod mock_invitations;
pub mod mock_storage;

pub use fixtures::*;
pub use http::*;
pub use mock_invitations::*;
pub use mock_storage::*;
