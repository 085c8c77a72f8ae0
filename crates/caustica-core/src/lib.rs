//! # Caustica Core
//!
//! The numerical backbone of Caustica. Given a source illumination density and
//! a target image density, this crate computes a refractive height field whose
//! refracted ray bundle reproduces the target on a receiver plane.
//!
//! ## Architecture
//!
//! The pipeline couples two services behind traits:
//!
//! - a [`transport::TransportSolver`] producing [`transport::TransportMap`]s
//!   that redistribute sample points according to a density, and
//! - an [`integration::NormalIntegrator`] reconstructing heights from a field
//!   of desired normals.
//!
//! The [`refine`] loop alternates Snell's-law normal estimation and
//! integration for a fixed number of iterations; [`pipeline`] drives the whole
//! run and hands each finished surface to a [`pipeline::SurfaceSink`].
//!
//! ## Modules
//!
//! - [`types`] — Lens parameters, defaults and run reports.
//! - [`density`] — Density fields and the image loader.
//! - [`tile`] — Point tiles and bounding-box normalization.
//! - [`transport`] — Transport solver trait, grid solver and maps.
//! - [`integration`] — Normal integrator trait and least-squares integrator.
//! - [`refine`] — The fixed-count refinement loop.
//! - [`pipeline`] — Run orchestration.

pub mod density;
pub mod integration;
pub mod pipeline;
pub mod refine;
pub mod tile;
pub mod transport;
pub mod types;
