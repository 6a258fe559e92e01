//! The video and image pipelines.
//!
//! A video run tracks vehicles frame by frame, keeps the best plate shots of
//! every vehicle and only reads the plates once the whole video has been
//! seen. Recognition order is vehicles in first-seen order, then each
//! vehicle's shots best first.

pub mod association;
pub mod controller;
pub mod image;
pub mod ledger;
pub mod recognition;

pub use association::{associate, process_frame, TrackedVehicle, VehicleRegistry, ASSOCIATION_THRESHOLD};
pub use controller::{TransientFile, VideoPipeline};
pub use image::ImagePipeline;
pub use ledger::{BestShotLedger, Shot, LEDGER_CAPACITY};
pub use recognition::{read_plate, PlateReading, RecognitionStage};
