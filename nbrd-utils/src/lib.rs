//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

pub mod bytes;
pub mod gre;
pub mod ibus;
pub mod ip;
pub mod policy;
pub mod protocol;
pub mod socket;
pub mod southbound;
pub mod task;

// Channel type aliases used throughout the workspace.
pub type Sender<T> = tokio::sync::mpsc::Sender<T>;
pub type Receiver<T> = tokio::sync::mpsc::Receiver<T>;
pub type UnboundedSender<T> = tokio::sync::mpsc::UnboundedSender<T>;
pub type UnboundedReceiver<T> = tokio::sync::mpsc::UnboundedReceiver<T>;
