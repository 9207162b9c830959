//! Latchkey - key/value capability loader for collaborative containers
//!
//! A single-flight, self-healing loader: give it a document locator and it
//! performs authentication, URL resolution, container loading and capability
//! discovery, then hands back a future that resolves exactly once to a live
//! key/value interface. Whenever the container's execution context changes
//! (e.g. a code upgrade reloads its component tree), the loader re-discovers
//! the capability transparently; callers who already hold a handle never
//! have it swapped underneath them.
//!
//! ## Pieces
//!
//! - **auth**: bearer credential issuing for resolution requests
//! - **resolution**: locator to transport-address resolution over HTTP
//! - **transport**: pluggable session backends and the resolution cache
//! - **container**: host configuration and bounded session open
//! - **attach**: the re-entrant discovery state machine
//! - **handle**: the write-once cell callers await the capability through
//! - **loader**: top-level orchestration

pub mod attach;
pub mod auth;
pub mod config;
pub mod container;
pub mod handle;
pub mod kv;
pub mod loader;
pub mod resolution;
pub mod session;
pub mod transport;
pub mod types;

pub use attach::{evaluate, AttachState, CapabilityAttacher, DEFAULT_ROOT_PATH};
pub use auth::{Claims, Credential, TokenIssuer};
pub use config::Config;
pub use container::{open_session, CachingUrlResolver, HostConfig};
pub use handle::HandleCell;
pub use kv::{Capability, KeyValue};
pub use loader::KeyValueLoader;
pub use resolution::{ResolutionClient, ResolvedUrl, SCOPE_DOC_READ};
pub use session::{ContainerSession, SessionResponse, CONTENT_KIND_COMPONENT};
pub use transport::{
    build_factories, DurableStorageFactory, OrderingFactory, ResolutionCache, TransportFactory,
    TransportSettings,
};
pub use types::{LatchkeyError, Result};
