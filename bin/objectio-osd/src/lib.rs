//! ObjectIO OSD - drive gateway
//!
//! Exposes each locally attached drive to the rest of the cluster over
//! HTTP. Drives are attached at startup by [`bootstrap`], published into
//! the [`registry`], and served through one [`gateway::DriveServer`] per
//! endpoint.

pub mod bootstrap;
pub mod gateway;
pub mod handlers;
pub mod registry;
pub mod response;
pub mod router;
pub mod rpc;

pub use bootstrap::{Bootstrap, FatalBootstrap};
pub use gateway::DriveServer;
pub use registry::DiskRegistry;
pub use router::{build_router, drive_servers};
