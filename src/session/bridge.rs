//! Native in-process server collaborator.
//!
//! Some platforms embed the app server in the client process. The session
//! layer only needs it started and a port to dial; the embedding is the
//! platform's business.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

// ============================================================================
// Constants
// ============================================================================

/// Loopback address the embedded server listens on.
pub const LOCAL_HOST: &str = "127.0.0.1";

// ============================================================================
// LocalServerBridge
// ============================================================================

/// Starts and stops an embedded app server.
#[async_trait]
pub trait LocalServerBridge: Send + Sync {
    /// Ensures the server is running and returns its loopback port.
    ///
    /// Calling this on a running server returns the same port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bridge`](crate::Error::Bridge) if the server could
    /// not be started.
    async fn start(&self) -> Result<u16>;

    /// Stops the server. A no-op if it is not running.
    async fn stop(&self);
}

#[async_trait]
impl<B> LocalServerBridge for Arc<B>
where
    B: LocalServerBridge + ?Sized,
{
    async fn start(&self) -> Result<u16> {
        (**self).start().await
    }

    async fn stop(&self) {
        (**self).stop().await;
    }
}

/// URL of an embedded server on `port`.
#[inline]
#[must_use]
pub fn local_url(port: u16) -> String {
    format!("ws://{LOCAL_HOST}:{port}")
}

// ============================================================================
// Tests
// ============================================================================
