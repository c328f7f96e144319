pub mod active_connection;
pub mod cert;
pub mod cert_matter;
pub mod cert_x509;
pub mod certmanager;
pub mod clusters;
pub mod commission;
pub mod controller;
pub mod devman;
pub mod discover;
pub mod fabric;
pub mod mdns;
pub mod mdns2;
pub mod messages;
pub mod onboarding;
pub mod reliable;
pub mod retransmit;
pub mod session;
pub mod sigma;
pub mod spake2p;
pub mod tlv;
pub mod transport;
pub mod util;

// `cert.rs` and `fabric.rs` address these as top-level paths.
pub use util::asn1;
pub use util::cryptoutil;
