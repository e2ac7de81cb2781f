// SPDX-License-Identifier: LGPL-3.0-only
//
// This file is provided WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.

mod app_config;
pub mod chain_config;
pub mod fhe_config;
pub mod load_config;
pub mod rpc;

pub use app_config::*;
pub use chain_config::*;
pub use fhe_config::*;
pub use rpc::*;
