// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

mod client;
pub mod discovery;
mod mapper;
mod pool;

pub use client::{ClusterClients, build_cluster_clients};
pub use discovery::{ResourceMapping, RestMapping};
pub use mapper::DynamicMapper;
pub use pool::ObjectClientPool;
