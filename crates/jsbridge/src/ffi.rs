//! Host Entry Points
//!
//! The C ABI the host calls. Every reply is written NUL-terminated into the
//! host's buffer or replaced by the overflow sentinel; it is never truncated.

use std::ffi::{CStr, c_char, c_int};
use std::panic;

use crate::BRIDGE_VERSION;
use crate::bridge::Bridge;
use crate::marshal::{self, NOTHING, OUT_OF_BOUNDS, SYSTEM_ERROR};

/// Fit `reply` into a buffer of `capacity` bytes including the terminator.
///
/// Oversized replies become the overflow `throw`; if even that does not fit
/// the reply is empty.
pub fn fit_reply(reply: String, capacity: usize) -> String {
    if reply.contains('\0') {
        return fit_reply(
            marshal::throw_statement("reply contains a NUL character"),
            capacity,
        );
    }
    if reply.len() < capacity {
        return reply;
    }

    tracing::debug!(
        "Reply of {} bytes exceeds the {} byte buffer",
        reply.len(),
        capacity
    );
    let overflow = marshal::throw_statement(OUT_OF_BOUNDS);
    if overflow.len() < capacity {
        overflow
    } else {
        NOTHING.to_string()
    }
}

/// Handle `input` on `bridge` for a buffer of `capacity` bytes.
pub fn call_with_capacity(bridge: &Bridge, input: &str, capacity: usize) -> String {
    fit_reply(bridge.call(input), capacity)
}

fn call_global(input: &str, capacity: usize) -> String {
    match Bridge::global() {
        Ok(bridge) => call_with_capacity(bridge, input, capacity),
        Err(_) => fit_reply(SYSTEM_ERROR.to_string(), capacity),
    }
}

/// Copy `reply` and a terminator into `output`.
///
/// # Safety
///
/// `output` must be valid for writes of `reply.len() + 1` bytes.
unsafe fn write_reply(output: *mut c_char, reply: &str) {
    let bytes = reply.as_bytes();
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), output.cast::<u8>(), bytes.len());
        *output.add(bytes.len()) = 0;
    }
}

/// Host entry point: handle one request.
///
/// # Safety
///
/// `output` must be valid for writes of `output_size` bytes and `function`
/// must be a NUL-terminated string or null.
#[allow(non_snake_case)]
#[unsafe(no_mangle)]
pub unsafe extern "system" fn RVExtension(
    output: *mut c_char,
    output_size: c_int,
    function: *const c_char,
) {
    let Ok(capacity) = usize::try_from(output_size) else {
        return;
    };
    if output.is_null() || capacity == 0 {
        return;
    }

    let input = if function.is_null() {
        String::new()
    } else {
        unsafe { CStr::from_ptr(function) }.to_string_lossy().into_owned()
    };

    let reply = panic::catch_unwind(|| call_global(&input, capacity)).unwrap_or_else(|_| {
        tracing::error!("Panic while handling a request");
        fit_reply(SYSTEM_ERROR.to_string(), capacity)
    });

    unsafe { write_reply(output, &reply) };
}

/// Host entry point: report the bridge version when the library loads.
///
/// # Safety
///
/// `output` must be valid for writes of `output_size` bytes.
#[allow(non_snake_case)]
#[unsafe(no_mangle)]
pub unsafe extern "system" fn RVExtensionVersion(output: *mut c_char, output_size: c_int) {
    let Ok(capacity) = usize::try_from(output_size) else {
        return;
    };
    if output.is_null() || capacity == 0 {
        return;
    }

    let version = fit_reply(BRIDGE_VERSION.to_string(), capacity);
    unsafe { write_reply(output, &version) };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use std::ffi::CString;

    fn invoke(input: &str, size: usize) -> String {
        let input = CString::new(input).unwrap();
        let mut buffer = vec![0x7f as c_char; size];
        unsafe { RVExtension(buffer.as_mut_ptr(), size as c_int, input.as_ptr()) };
        let reply = unsafe { CStr::from_ptr(buffer.as_ptr()) };
        reply.to_string_lossy().into_owned()
    }

    #[test]
    fn test_fit_reply() {
        assert_eq!(fit_reply("abc".into(), 4), "abc");
        assert_eq!(fit_reply("abcd".into(), 4), "");
        assert_eq!(fit_reply("x".repeat(100), 64), r#"throw "[OOB]""#);
        assert_eq!(fit_reply("x".repeat(100), 14), r#"throw "[OOB]""#);
        assert_eq!(fit_reply("x".repeat(100), 13), "");
    }

    #[test]
    fn test_nul_in_reply() {
        let reply = fit_reply("a\0b".into(), 1024);
        assert!(reply.starts_with("throw "));
        assert!(!reply.contains('\0'));
    }

    #[test]
    fn test_oversized_result() {
        let bridge = Bridge::new(&BridgeConfig::default()).unwrap();
        let reply = call_with_capacity(&bridge, "'x'.repeat(20000)", 10240);
        assert_eq!(reply, r#"throw "[OOB]""#);

        let fits = call_with_capacity(&bridge, "'x'.repeat(100)", 10240);
        assert_eq!(fits.len(), 102);
    }

    #[test]
    fn test_entry_point() {
        assert_eq!(invoke("1 + 1", 64), "2");
        assert_eq!(invoke("#I", 64), "");
        assert_eq!(invoke("'abcdefghijklmnopqrstuvwxyz'", 16), r#"throw "[OOB]""#);
        assert_eq!(invoke("'abcdefghijklmnopqrstuvwxyz'", 8), "");
    }

    #[test]
    fn test_huge_array_reply_recovers() {
        assert_eq!(invoke("var huge = []; huge.length = 4294967295; huge", 64), r#"throw "[OOB]""#);
        assert_eq!(invoke("1 + 1", 64), "2");
    }

    #[test]
    fn test_version_entry_point() {
        let mut buffer = vec![0 as c_char; 32];
        unsafe { RVExtensionVersion(buffer.as_mut_ptr(), buffer.len() as c_int) };
        let version = unsafe { CStr::from_ptr(buffer.as_ptr()) };
        assert_eq!(version.to_str().unwrap(), BRIDGE_VERSION);
    }
}
