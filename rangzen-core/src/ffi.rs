//! C ABI for linking rangzen-core as a static library from Android (NDK) or other C/C++ hosts.
//! The host owns the sockets; it feeds received frames to an exchange handle and
//! writes out whatever the handle returns.

use std::ffi::{c_void, CStr};
use std::os::raw::{c_char, c_int};
use std::slice;

use crate::arbiter::which_initiates;
use crate::error::StoreError;
use crate::exchange::{Exchange, ExchangeConfig, ExchangeState, Role};
use crate::protocol::{Message, WireMessage, PROTOCOL_VERSION};
use crate::stores::Stores;
use crate::wire;

/// Returns the current protocol version. Used so the staticlib exports a C symbol and is linkable.
#[no_mangle]
pub extern "C" fn rangzen_core_version() -> u8 {
    PROTOCOL_VERSION
}

unsafe fn c_str<'a>(p: *const c_char) -> Option<&'a str> {
    if p.is_null() {
        return None;
    }
    CStr::from_ptr(p).to_str().ok()
}

fn write_out(bytes: &[u8], out_buf: *mut u8, out_buf_len: usize) -> c_int {
    if out_buf.is_null() || bytes.len() > out_buf_len || bytes.len() > c_int::MAX as usize {
        return -1;
    }
    unsafe {
        out_buf.copy_from_nonoverlapping(bytes.as_ptr(), bytes.len());
    }
    bytes.len() as c_int
}

/// Open stores persisted under `dir` (NUL-terminated UTF-8). Returns opaque handle or null on failure.
#[no_mangle]
pub extern "C" fn rangzen_stores_open(dir: *const c_char) -> *mut c_void {
    let Some(dir) = (unsafe { c_str(dir) }) else {
        return std::ptr::null_mut();
    };
    match Stores::open(dir) {
        Ok(s) => Box::into_raw(Box::new(s)) as *mut c_void,
        Err(e) => {
            tracing::warn!(error = %e, "failed to open stores");
            std::ptr::null_mut()
        }
    }
}

/// Volatile stores, for hosts running tests.
#[no_mangle]
pub extern "C" fn rangzen_stores_in_memory() -> *mut c_void {
    Box::into_raw(Box::new(Stores::in_memory())) as *mut c_void
}

/// Destroy stores handle. No-op if h is null.
#[no_mangle]
pub extern "C" fn rangzen_stores_destroy(h: *mut c_void) {
    if h.is_null() {
        return;
    }
    let _ = unsafe { Box::from_raw(h as *mut Stores) };
}

/// Add or replace a message. Returns 0 on success, -1 on invalid input, -2 on storage failure.
#[no_mangle]
pub extern "C" fn rangzen_add_message(h: *mut c_void, body: *const u8, body_len: usize, priority: f64) -> c_int {
    if h.is_null() || body.is_null() {
        return -1;
    }
    let stores = unsafe { &*(h as *const Stores) };
    let bytes = unsafe { slice::from_raw_parts(body, body_len) };
    let Ok(text) = std::str::from_utf8(bytes) else {
        return -1;
    };
    match stores.add_message(text, priority) {
        Ok(()) => 0,
        Err(StoreError::Storage(_)) => -2,
        Err(_) => -1,
    }
}

/// Number of stored messages, or -1 on error.
#[no_mangle]
pub extern "C" fn rangzen_message_count(h: *mut c_void) -> i64 {
    if h.is_null() {
        return -1;
    }
    let stores = unsafe { &*(h as *const Stores) };
    stores.messages.count().map(|n| n as i64).unwrap_or(-1)
}

/// Write the top `k` messages to out_buf as one frame carrying a bincode `Messages`.
/// Returns bytes written, or -1 on error (including out_buf too small).
#[no_mangle]
pub extern "C" fn rangzen_top_k(h: *mut c_void, k: usize, out_buf: *mut u8, out_buf_len: usize) -> c_int {
    if h.is_null() {
        return -1;
    }
    let stores = unsafe { &*(h as *const Stores) };
    let Ok(top) = stores.top_k(k) else {
        return -1;
    };
    let msg = Message::Messages {
        messages: top
            .into_iter()
            .map(|(priority, body)| WireMessage { body, priority })
            .collect(),
    };
    match wire::encode_frame(&msg) {
        Ok(frame) => write_out(&frame, out_buf, out_buf_len),
        Err(_) => -1,
    }
}

/// Add a friend ID. Returns 1 if added, 0 if already present, -1 on error.
#[no_mangle]
pub extern "C" fn rangzen_add_friend(h: *mut c_void, id: *const u8, id_len: usize) -> c_int {
    if h.is_null() || id.is_null() {
        return -1;
    }
    let stores = unsafe { &*(h as *const Stores) };
    let id = unsafe { slice::from_raw_parts(id, id_len) };
    match stores.friends.add(id) {
        Ok(true) => 1,
        Ok(false) => 0,
        Err(_) => -1,
    }
}

/// Number of friends, or -1 on error.
#[no_mangle]
pub extern "C" fn rangzen_friend_count(h: *mut c_void) -> i64 {
    if h.is_null() {
        return -1;
    }
    let stores = unsafe { &*(h as *const Stores) };
    stores.friends.count().map(|n| n as i64).unwrap_or(-1)
}

/// Which of two NUL-terminated addresses initiates. Returns 0 for `a`, 1 for `b`, -1 if either is null.
#[no_mangle]
pub extern "C" fn rangzen_which_initiates(a: *const c_char, b: *const c_char) -> c_int {
    let (a, b) = unsafe { (c_str(a), c_str(b)) };
    match which_initiates(a, b) {
        None => -1,
        Some(x) if Some(x) == a => 0,
        Some(_) => 1,
    }
}

/// Create an exchange over the stores handle `h`. `initiator` nonzero for the initiating side.
/// The exchange keeps its own reference to the stores. Returns opaque handle or null on failure.
#[no_mangle]
pub extern "C" fn rangzen_exchange_create(
    h: *mut c_void,
    initiator: c_int,
    local_address: *const c_char,
    max_messages: usize,
) -> *mut c_void {
    if h.is_null() {
        return std::ptr::null_mut();
    }
    let Some(local) = (unsafe { c_str(local_address) }) else {
        return std::ptr::null_mut();
    };
    let stores = unsafe { &*(h as *const Stores) }.clone();
    let role = if initiator != 0 { Role::Initiator } else { Role::Responder };
    let config = ExchangeConfig {
        max_messages,
        timeout: None,
    };
    Box::into_raw(Box::new(Exchange::new(role, local, stores, config))) as *mut c_void
}

/// Destroy exchange handle. No-op if ex is null.
#[no_mangle]
pub extern "C" fn rangzen_exchange_destroy(ex: *mut c_void) {
    if ex.is_null() {
        return;
    }
    let _ = unsafe { Box::from_raw(ex as *mut Exchange) };
}

fn write_frames(payloads: &[Vec<u8>], out_buf: *mut u8, out_buf_len: usize) -> c_int {
    let mut out = Vec::new();
    for p in payloads {
        match wire::frame_payload(p) {
            Ok(f) => out.extend_from_slice(&f),
            Err(_) => return -1,
        }
    }
    if out.is_empty() {
        return 0;
    }
    write_out(&out, out_buf, out_buf_len)
}

/// Start the exchange. Writes frames to send (length-prefixed) to out_buf.
/// Returns bytes written (0 for the responder), or -1 on error.
#[no_mangle]
pub extern "C" fn rangzen_exchange_start(ex: *mut c_void, out_buf: *mut u8, out_buf_len: usize) -> c_int {
    if ex.is_null() {
        return -1;
    }
    let exchange = unsafe { &mut *(ex as *mut Exchange) };
    match exchange.start() {
        Ok(step) => write_frames(&step.send, out_buf, out_buf_len),
        Err(_) => -1,
    }
}

/// Feed one received payload (frame contents without the length prefix). Writes frames to send to
/// out_buf and sets *out_done to 1 when the exchange is complete. Returns bytes written, or -1 on error.
#[no_mangle]
pub extern "C" fn rangzen_exchange_on_payload(
    ex: *mut c_void,
    payload: *const u8,
    payload_len: usize,
    out_buf: *mut u8,
    out_buf_len: usize,
    out_done: *mut c_int,
) -> c_int {
    if ex.is_null() || payload.is_null() || out_done.is_null() {
        return -1;
    }
    let exchange = unsafe { &mut *(ex as *mut Exchange) };
    let payload = unsafe { slice::from_raw_parts(payload, payload_len) };
    match exchange.on_payload(payload) {
        Ok(step) => {
            let n = write_frames(&step.send, out_buf, out_buf_len);
            if n >= 0 && step.done {
                exchange.close();
            }
            unsafe {
                *out_done = step.done as c_int;
            }
            n
        }
        Err(e) => {
            tracing::debug!(error = %e, "exchange failed");
            -1
        }
    }
}

/// Exchange state: 0 idle, 1 in progress, 2 exchanged, 3 closed, 4 failed, -1 if ex is null.
#[no_mangle]
pub extern "C" fn rangzen_exchange_state(ex: *mut c_void) -> c_int {
    if ex.is_null() {
        return -1;
    }
    let exchange = unsafe { &*(ex as *const Exchange) };
    match exchange.state() {
        ExchangeState::Idle => 0,
        ExchangeState::SendingOrAwaitingFirstMessage => 1,
        ExchangeState::Exchanged => 2,
        ExchangeState::Closed => 3,
        ExchangeState::Failed => 4,
    }
}
