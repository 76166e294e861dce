//! Cell lineage reconstruction from CellProfiler `TrackObjects` output.
//!
//! The object table is loaded into a [`record_store::RecordStore`], seeded
//! with every track start ([`lineage_seed`]), each seed is walked forward
//! through time ([`track_walk`]), and the finished tracks are annotated with
//! time and ancestry ([`lineage_annotate`]). [`engine`] drives these steps as
//! serializable operations.

pub mod about;
pub mod engine;
pub mod error;
pub mod export;
pub mod foci;
pub mod lineage_annotate;
pub mod lineage_seed;
pub mod overlay;
pub mod record_store;
pub mod shape;
pub mod table;
pub mod track_walk;
