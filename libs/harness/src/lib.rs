//! # cpat-harness
//!
//! Acceptance-test harness for an event-driven cluster control plane.
//!
//! A scenario drives the service from two sides at once: authenticated REST
//! calls against its public API, and a simulated cluster agent on its
//! internal command-and-event transport. It then checks that what REST
//! reports converges with what the harness expects.
//!
//! ## Components
//!
//! - [`http::SecureClient`]: mutually authenticated REST requests with
//!   expected-status enforcement
//! - [`session::AgentSession`]: one simulated agent connection with a
//!   background receive loop
//! - [`registry::ChannelRegistry`]: single-use rendezvous slots that
//!   correlate inbound messages with waiting assertions
//! - [`driver`] and [`scenarios`]: sequencing of mutations, protocol side
//!   effects, convergence waits, and comparisons
//! - [`compare`]: snapshot normalization and structural diffing
//!
//! ## Example
//!
//! ```ignore
//! let ctx = TestContext::new(HarnessConfig::from_env()?)?
//!     .with_datastore(datastore);
//! let reports = runner::run_all(&ctx, &runner::select(&[])?).await;
//! ```

pub mod admin;
pub mod api;
pub mod compare;
pub mod config;
pub mod context;
pub mod datastore;
pub mod driver;
pub mod error;
pub mod http;
pub mod registry;
pub mod runner;
pub mod scenarios;
pub mod session;
pub mod tls;

pub use admin::{AdminCommand, AdminError, CliAdminCommand, Invocation};
pub use compare::{compare, Snapshot, Verdict};
pub use config::HarnessConfig;
pub use context::{Fixture, TestContext};
pub use datastore::Datastore;
pub use error::{FailureClass, HarnessError, Result};
pub use registry::{ChannelRegistry, WaitError, Waiter};
pub use runner::{Outcome, ScenarioReport};
pub use scenarios::{Scenario, CATALOGUE};
pub use session::{AgentSession, AgentState};
