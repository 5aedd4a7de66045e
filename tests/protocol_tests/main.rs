//! Tests for the host wire protocol

mod codec_tests;
