pub mod autosave;
pub mod backup;
pub mod recovery;
pub mod status;

pub use autosave::{
    AutoSaveEngine, AutoSaveEvent, BackupOutcome, ManualSave, SaveRequest, SaveTicket, SaveTrigger,
};
pub use backup::{BackupRecord, LocalBackupStore, SweepReport};
pub use recovery::{RecoveryCoordinator, RecoveryOffer};
pub use status::{SaveState, SaveStatus, Severity};
