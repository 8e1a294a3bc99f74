//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

#![allow(clippy::too_many_arguments)]

pub mod af;
pub mod debug;
pub mod error;
pub mod events;
pub mod instance;
pub mod neighbor;
pub mod network;
pub mod packet;
pub mod policy;
pub mod rib;
pub mod southbound;
pub mod tasks;
