//! Integration tests for the nestkv workspace. Everything lives behind
//! `cfg(test)`; the library itself is empty.

#[cfg(test)]
mod constraint_test;
#[cfg(test)]
mod storage_test;
