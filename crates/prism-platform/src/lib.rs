// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]

mod event;

pub use event::{key_name, scroll_lines, AppEvent, MouseButton};
pub use winit;
