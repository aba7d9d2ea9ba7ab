//! FFI bindings for EQ Vault
//!
//! C-compatible entry points for host apps. Strings in and out are
//! null-terminated UTF-8; every returned string is heap-allocated and must be
//! released with `eq_free_string`. Only the local pipeline and pricing are
//! exposed here: nothing on this surface can reach a network.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::error::Result;
use crate::pipeline::{signals_to_metrics, EqProcessor};
use crate::types::EqPattern;
use crate::value::{ValueCreator, ValueFactors};

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Read a C string argument, recording an error naming it when invalid
unsafe fn read_arg(ptr: *const c_char, name: &str) -> Option<String> {
    if ptr.is_null() {
        set_last_error(&format!("Null {name} pointer"));
        return None;
    }
    match CStr::from_ptr(ptr).to_str() {
        Ok(s) => Some(s.to_string()),
        Err(_) => {
            set_last_error(&format!("Invalid UTF-8 in {name}"));
            None
        }
    }
}

fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Hand a result back across the boundary as an owned string or NULL
fn into_c_result(result: Result<String>) -> *mut c_char {
    match result {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Stateless API
// ============================================================================

/// Compute EQ metrics for a JSON array of signals.
///
/// # Safety
/// - `signals_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `eq_free_string`.
/// - Returns NULL on error; call `eq_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn eq_signals_to_metrics(signals_json: *const c_char) -> *mut c_char {
    clear_last_error();

    let Some(json) = read_arg(signals_json, "signals JSON") else {
        return ptr::null_mut();
    };
    into_c_result(signals_to_metrics(&json))
}

/// Price a pattern with the default revenue split.
///
/// `factors_json` may be NULL, meaning all factors are zero.
///
/// # Safety
/// - `pattern_json` must be a valid null-terminated C string.
/// - `factors_json` must be NULL or a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `eq_free_string`.
/// - Returns NULL on error; call `eq_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn eq_price_pattern(
    pattern_json: *const c_char,
    factors_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let Some(pattern_str) = read_arg(pattern_json, "pattern JSON") else {
        return ptr::null_mut();
    };
    let factors_str = if factors_json.is_null() {
        None
    } else {
        match read_arg(factors_json, "factors JSON") {
            Some(s) => Some(s),
            None => return ptr::null_mut(),
        }
    };

    into_c_result(price_json(&pattern_str, factors_str.as_deref()))
}

fn price_json(pattern_json: &str, factors_json: Option<&str>) -> Result<String> {
    let pattern: EqPattern = serde_json::from_str(pattern_json)?;
    let factors: ValueFactors = match factors_json {
        Some(s) => serde_json::from_str(s)?,
        None => ValueFactors::default(),
    };
    let valuation = ValueCreator::default().price(&pattern, &factors)?;
    Ok(serde_json::to_string(&valuation)?)
}

// ============================================================================
// Stateful Processor API
// ============================================================================

/// Opaque handle to an EqProcessor
pub struct EqProcessorHandle {
    processor: EqProcessor,
}

/// Create a processor holding up to `history_window` snapshots
/// (non-positive values select the default window).
///
/// # Safety
/// - Returns a pointer to a newly allocated processor.
/// - Must be freed with `eq_processor_free`.
#[no_mangle]
pub unsafe extern "C" fn eq_processor_new(history_window: i32) -> *mut EqProcessorHandle {
    clear_last_error();

    let processor = if history_window <= 0 {
        EqProcessor::new()
    } else {
        EqProcessor::with_history_window(history_window as usize)
    };
    Box::into_raw(Box::new(EqProcessorHandle { processor }))
}

/// Free a processor.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `eq_processor_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn eq_processor_free(processor: *mut EqProcessorHandle) {
    if !processor.is_null() {
        drop(Box::from_raw(processor));
    }
}

/// Process a JSON array of signals, returning the analysis as JSON.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `eq_processor_new`.
/// - `signals_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `eq_free_string`.
/// - Returns NULL on error; call `eq_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn eq_processor_process(
    processor: *mut EqProcessorHandle,
    signals_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if processor.is_null() {
        set_last_error("Null processor pointer");
        return ptr::null_mut();
    }
    let handle = &mut *processor;

    let Some(json) = read_arg(signals_json, "signals JSON") else {
        return ptr::null_mut();
    };
    into_c_result(handle.processor.process_json(&json))
}

/// Save processor history to JSON.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `eq_processor_new`.
/// - Returns a newly allocated string that must be freed with `eq_free_string`.
/// - Returns NULL on error; call `eq_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn eq_processor_save_history(processor: *mut EqProcessorHandle) -> *mut c_char {
    clear_last_error();

    if processor.is_null() {
        set_last_error("Null processor pointer");
        return ptr::null_mut();
    }
    let handle = &*processor;
    into_c_result(handle.processor.save_history())
}

/// Load processor history from JSON.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `eq_processor_new`.
/// - `json` must be a valid null-terminated C string.
/// - Returns 0 on success, -1 on error (see `eq_last_error`).
#[no_mangle]
pub unsafe extern "C" fn eq_processor_load_history(
    processor: *mut EqProcessorHandle,
    json: *const c_char,
) -> i32 {
    clear_last_error();

    if processor.is_null() {
        set_last_error("Null processor pointer");
        return -1;
    }
    let handle = &mut *processor;

    let Some(json_str) = read_arg(json, "history JSON") else {
        return -1;
    };
    match handle.processor.load_history(&json_str) {
        Ok(()) => 0,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by an EQ Vault function.
///
/// # Safety
/// - `ptr` must be a pointer returned by an EQ Vault function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn eq_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message on this thread.
///
/// # Safety
/// - The returned pointer is valid until the next EQ Vault call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if the last call succeeded.
#[no_mangle]
pub unsafe extern "C" fn eq_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn eq_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals() -> CString {
        CString::new(
            r#"[
                {"type": "self_reflection", "timestamp": "2024-05-01T08:00:00Z", "intensity": 0.4},
                {"type": "goal_achieved", "timestamp": "2024-05-01T09:00:00Z", "quality": 0.9}
            ]"#,
        )
        .unwrap()
    }

    #[test]
    fn test_ffi_signals_to_metrics() {
        let json = signals();
        unsafe {
            let result = eq_signals_to_metrics(json.as_ptr());
            assert!(!result.is_null());

            let result_str = CStr::from_ptr(result).to_str().unwrap();
            let metrics: serde_json::Value = serde_json::from_str(result_str).unwrap();
            assert_eq!(metrics["data_points"], 2);
            assert_eq!(metrics["motivation"], 100.0);

            eq_free_string(result);
        }
    }

    #[test]
    fn test_ffi_processor_lifecycle() {
        unsafe {
            let processor = eq_processor_new(7);
            assert!(!processor.is_null());

            let json = signals();
            let result = eq_processor_process(processor, json.as_ptr());
            assert!(!result.is_null());
            let analysis: serde_json::Value =
                serde_json::from_str(CStr::from_ptr(result).to_str().unwrap()).unwrap();
            assert!(analysis["insights"].as_array().is_some());
            eq_free_string(result);

            let history = eq_processor_save_history(processor);
            assert!(!history.is_null());

            let processor2 = eq_processor_new(0);
            assert_eq!(eq_processor_load_history(processor2, history), 0);

            eq_free_string(history);
            eq_processor_free(processor);
            eq_processor_free(processor2);
        }
    }

    #[test]
    fn test_ffi_price_device_only_pattern() {
        let pattern = CString::new(
            r#"{
                "id": "1f0c6a62-4c43-4b8e-9a53-7f6a0c1e2d3b",
                "type": "emotional-breakthrough",
                "confidence": 0.9,
                "detected_at": "2024-05-01T08:00:00Z",
                "anonymized_insight": "insight",
                "growth_suggestion": "suggestion",
                "privacy_level": "device-only"
            }"#,
        )
        .unwrap();

        unsafe {
            let result = eq_price_pattern(pattern.as_ptr(), ptr::null());
            assert!(!result.is_null());
            let valuation: serde_json::Value =
                serde_json::from_str(CStr::from_ptr(result).to_str().unwrap()).unwrap();
            assert_eq!(valuation["success"], false);
            assert_eq!(valuation["privacy_guaranteed"], true);
            eq_free_string(result);
        }
    }

    #[test]
    fn test_ffi_error_handling() {
        unsafe {
            let empty = CString::new("[]").unwrap();
            assert!(eq_signals_to_metrics(empty.as_ptr()).is_null());

            let error = eq_last_error();
            assert!(!error.is_null());
            let error_str = CStr::from_ptr(error).to_str().unwrap();
            assert!(error_str.contains("empty"));

            assert!(eq_signals_to_metrics(ptr::null()).is_null());
            assert!(eq_processor_process(ptr::null_mut(), empty.as_ptr()).is_null());
        }
    }

    #[test]
    fn test_ffi_rejects_zero_window_history() {
        let history = CString::new(r#"{"snapshots":[],"window_size":0}"#).unwrap();
        unsafe {
            let processor = eq_processor_new(30);
            assert_eq!(eq_processor_load_history(processor, history.as_ptr()), -1);
            assert!(!eq_last_error().is_null());
            eq_processor_free(processor);
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = eq_version();
            assert!(!version.is_null());
            assert!(!CStr::from_ptr(version).to_str().unwrap().is_empty());
        }
    }
}
