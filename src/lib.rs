//! Progressive path tracing and Metropolis light transport over glTF scenes.
//!
//! The crate is organized bottom-up: math primitives and the worker RNG,
//! geometry (AABB / packed 4-wide AABB / 4-ary SAH BVH), the scene model
//! (meshes, materials, lights, camera), light-path construction and
//! evaluation, and finally the two estimators ([`path_tracer::PathTracer`]
//! and [`mlt::Mlt`]) behind a common [`renderer::Renderer`] contract driven
//! by [`renderer::RenderProcess`].

pub mod aabb;
pub mod aabb4;
pub mod bvh;
pub mod camera;
pub mod distribution;
pub mod film;
pub mod gltf_loader;
pub mod light;
pub mod material;
pub mod math;
pub mod mesh;
pub mod mlt;
pub mod path;
pub mod path_tracer;
pub mod renderer;
pub mod rng;
pub mod scene;
pub mod threadpool;

#[cfg(test)]
pub mod test_support;
