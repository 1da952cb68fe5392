pub mod discovery;
pub mod memory;
pub mod rfcomm;
pub mod tcp;
pub mod traits;

pub use discovery::{enable_radio, DiscoveredPeer, PeerScanner, ScanConfig};
pub use memory::{memory_link, DialRequest, MemoryRemote, MemoryTransport};
pub use rfcomm::{RfcommConfig, RfcommTransport, RfcommTransportStream, DEFAULT_RFCOMM_CHANNEL};
pub use tcp::{TcpConfig, TcpTransport, TcpTransportStream};
pub use traits::{BoxedStream, Transport, TransportListener, TransportStream};
