//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

#![allow(clippy::too_many_arguments)]

pub mod area;
pub mod collections;
pub mod debug;
pub mod error;
pub mod events;
pub mod flood;
pub mod instance;
pub mod interface;
pub mod lsdb;
pub mod neighbor;
pub mod network;
pub mod output;
pub mod packet;
pub mod route;
pub mod southbound;
pub mod spf;
pub mod tasks;
