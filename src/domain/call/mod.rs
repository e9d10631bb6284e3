//! Call bounded context - session state machine, carrier events and actions

pub mod action;
pub mod event;
pub mod repository;
pub mod session;
pub mod value_object;

pub use action::{ActionList, CarrierAction};
pub use event::{CarrierEvent, CarrierEventKind, EventPayload, ExplicitRoute};
pub use repository::CallSessionStore;
pub use session::{metadata_keys, CallSession, NewCallSession, Speaker, TranscriptFragment};
pub use value_object::{CallDirection, CallState};
