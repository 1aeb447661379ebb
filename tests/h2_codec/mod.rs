//! Integration tests for the HTTP/2 frame codec
