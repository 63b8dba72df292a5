//! Domain model (ids, requests, task records, outcomes, errors, events).

pub mod errors;
pub mod events;
pub mod ids;
pub mod outcome;
pub mod request;
pub mod state;
pub mod task;

pub use errors::{ErrorClass, ImportError, SubmitError, TaskError, TransportError};
pub use events::TaskEvent;
pub use ids::{Id, IdMarker, ParseIdError, RemoteTaskId, TaskId};
pub use outcome::{AssetFormat, Balance, HandleRole, PollReport, RemoteStatus, ResultHandle};
pub use request::{
    FileToken, GenerationInput, GenerationKind, GenerationOptions, GenerationRequest, GeometryQuality,
    ImageFormat, ImageRef, ModelStyle, ModelVersion, MultiviewImages, Orientation, RequestSummary,
    TextureAlignment, TextureQuality,
};
pub use state::TaskStatus;
pub use task::{Task, TaskSnapshot};
