//! # Caustica Geometry
//!
//! Geometry handling for the Caustica framework. This crate provides:
//!
//! - **Surface mesh** ([`mesh`]) — A fixed-topology regular grid of vertices
//!   whose heights describe the refractive surface.
//! - **Refraction** ([`refraction`]) — Snell's-law estimation of the normal
//!   each vertex needs to steer a collimated ray onto a receiver point.
//! - **Exporters** ([`export`]) — Solid `.obj`, map `.off` and point `.eps`
//!   writers.
//! - **File parsers** ([`parsers`]) — Read `.obj` meshes back in.

pub mod export;
pub mod mesh;
pub mod parsers;
pub mod refraction;

pub use mesh::{MeshError, SurfaceMesh};
pub use refraction::NormalComponents;
