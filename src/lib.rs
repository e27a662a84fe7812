/* ************************************************************************ **
** This file is part of vesfit, and is licensed under EITHER the MIT        **
** license or the Apache 2.0 license, at your option.                       **
**                                                                          **
**     http://www.apache.org/licenses/LICENSE-2.0                           **
**     http://opensource.org/licenses/MIT                                   **
** ************************************************************************ */

//! Umbrella crate: re-exports the workspace members and provides the
//! logging setup and the demo driver used by the `vesfit-demo` binary.

#[macro_use] extern crate log;
#[macro_use] extern crate failure;

pub type FailResult<T> = Result<T, failure::Error>;

pub use vesfit_coeffs::{CoeffsMatrix, CoeffsSpace, CoeffsVector, MatrixMode};
pub use vesfit_optimizer::{BiasExpansion, Optimizer, Settings, UpdateRule};
pub use vesfit_walkers::{ReplicaGroup, SingleReplica, ThreadGroup};

pub mod demo;
pub mod logging;
