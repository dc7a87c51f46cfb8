#![doc = include_str!("../../../README.md")]

mod context;
mod dispatch;
mod engine;
mod error;
mod handle;
mod runtime;
mod updater;

pub use crate::{
    context::{ContextHandle, ExecutionContext},
    dispatch::{DispatchPhase, DispatchTarget, fence},
    engine::{Engine, EngineOptions, ProxyEdge, ProxyGraph, ProxyVertex, RunReport, UpdateFailure, VertexId},
    error::{EngineError, ForeignException, PinError, UpdateError},
    handle::Handle,
    runtime::ForeignRuntime,
    updater::ProxyUpdater,
};
