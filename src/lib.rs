// SPDX-License-Identifier: Apache-2.0

pub mod bounded_channel;
pub mod init;
pub mod processor;
pub mod sink;
pub mod tailer;
