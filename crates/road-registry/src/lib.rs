//! Road registry for the offramp delivery gateway.
//!
//! The gateway never mutates roads. It reads point-in-time [`RoadSnapshot`]s
//! published by a [`RoadRegistry`] and resolves record schemas through the
//! [`SchemaProvider`].
//!
//! # Registry file
//!
//! ```yaml
//! roads:
//!   - name: bookings
//!     enabled: true
//!     schemas:
//!       1: '{"type": "record", "name": "Booking", "fields": [{"name": "id", "type": "string"}]}'
//! ```

mod error;
mod registry;
mod road;
mod schema;


pub use error::{RegistryError, Result, SchemaError};
pub use registry::{FileRoadRegistry, RoadRegistry, StaticRoadRegistry};
pub use road::{Road, RoadSnapshot};
pub use schema::SchemaProvider;
