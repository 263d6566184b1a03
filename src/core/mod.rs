pub mod catalog;
pub mod codec;
pub mod engine;
pub mod matcher;
pub mod normalize;
pub mod quality;
pub mod scanner;
pub mod tags;

pub use catalog::{RemoteAlbum, RemoteArtist, RemoteSong, RemoteSongError};
pub use codec::{AudioFormat, ContainerCodec, DecodedContainer, DecryptedTrackMetadata};
pub use engine::{ReconcileEngine, ReconcileSummary};
pub use matcher::{
    CatalogMatcher, MatchMethod, MatchResult, MatchedTrack, UnavailableReason, UnavailableSong,
    UpgradableTrack,
};
pub use quality::Quality;
pub use scanner::{LocalScanner, ScanOptions, ScanProgress, ScanResult};
