//! Typed identifiers for queue entities.
//!
//! Jobs, workers, and hatcheries only ever reference each other by id, so
//! each entity gets its own newtype to keep a `WorkerId` from being handed
//! where a `JobId` belongs. UUIDv7 keeps records time-ordered and sortable.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            Serialize, Deserialize, Display,
        )]
        #[display("{_0}")]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

entity_id!(
    /// Identifier of a schedulable job.
    JobId
);
entity_id!(
    /// Identifier of the node-run that owns a job and its outputs.
    NodeRunId
);
entity_id!(
    /// Identifier of a registered worker.
    WorkerId
);
entity_id!(
    /// Identifier of a registered hatchery.
    HatcheryId
);
entity_id!(
    /// Identifier of a stored artifact.
    ArtifactId
);
