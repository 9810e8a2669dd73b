pub mod init;
pub mod inspect;
pub mod ledger;
pub mod share;
pub mod version;

pub use init::Init;
pub use inspect::Inspect;
pub use ledger::Ledger;
pub use share::Share;
pub use version::Version;
