//! In-memory cabinet for tests and development.
//!
//! [`MockLink`] implements [`SerialLink`] over a `tokio::io::duplex` pipe.
//! Every successful open spawns a fresh simulated board on the far end;
//! the [`MockCabinetHandle`] returned alongside the link controls it.

mod cabinet;

pub use cabinet::MockCabinetHandle;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::io::DuplexStream;

use crate::config::SerialConfig;
use crate::error::{Result, TransportError};
use crate::link::SerialLink;
use cabinet::MockShared;

const PIPE_CAPACITY: usize = 1024;

/// Link to a simulated DS12 cabinet.
///
/// # Examples
///
/// ```
/// use medcab_hardware::mock::MockLink;
/// use medcab_hardware::{SerialConfig, SerialLink};
///
/// #[tokio::main]
/// async fn main() -> medcab_hardware::Result<()> {
///     let (link, cabinet) = MockLink::new();
///     cabinet.fail_next_opens(1);
///
///     assert!(link.open(&SerialConfig::default()).await.is_err());
///     let _stream = link.open(&SerialConfig::default()).await?;
///     assert_eq!(cabinet.open_count(), 1);
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct MockLink {
    shared: Arc<MockShared>,
}

impl MockLink {
    pub fn new() -> (Self, MockCabinetHandle) {
        let shared = Arc::new(MockShared::new());
        let handle = MockCabinetHandle {
            shared: Arc::clone(&shared),
        };
        (Self { shared }, handle)
    }
}

impl SerialLink for MockLink {
    type Stream = DuplexStream;

    fn open(&self, config: &SerialConfig) -> impl Future<Output = Result<DuplexStream>> + Send {
        let shared = Arc::clone(&self.shared);
        let port = config.port.clone();
        async move {
            let failed = shared
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(TransportError::open_failed(port, "simulated open failure"));
            }

            shared.opens.fetch_add(1, Ordering::SeqCst);
            let (host, board) = tokio::io::duplex(PIPE_CAPACITY);
            let injected = shared.attach();
            tokio::spawn(cabinet::serve(board, shared, injected));
            Ok(host)
        }
    }
}
