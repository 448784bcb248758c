//! C Bindings for the sensor exchange
//!
//! Provides a raw C API so a value source written in another language can
//! drive a producer, and a minimal reader for the consumer side.
//!
//! Functions returning `i32` use `SX_OK` (0) for success and a negative
//! status per error class otherwise.

use crate::config::ExchangeConfig;
use crate::consumer::{Consumer, Snapshot};
use crate::error::ExchangeError;
use crate::layout::EntryType;
use crate::producer::{FlushOutcome, Producer};
use crate::topology::{EntrySpec, SensorHandle, Topology};
use std::ffi::CStr;
use std::os::raw::c_char;
use std::ptr;

pub const SX_OK: i32 = 0;
pub const SX_ERR_ARGUMENT: i32 = -1;
pub const SX_ERR_ALLOCATION: i32 = -2;
pub const SX_ERR_CONFLICT: i32 = -3;
pub const SX_ERR_NOT_FOUND: i32 = -4;
pub const SX_ERR_INVALID_FORMAT: i32 = -5;
pub const SX_ERR_LOCK_TIMEOUT: i32 = -6;
pub const SX_ERR_INVALID_STATE: i32 = -7;
pub const SX_ERR_INVALID_NAME: i32 = -8;

// Opaque handles
pub struct SxProducerHandle(Producer);
pub struct SxConsumerHandle(Consumer);

fn status(err: &ExchangeError) -> i32 {
    match err {
        ExchangeError::Allocation { .. } => SX_ERR_ALLOCATION,
        ExchangeError::RegionConflict { .. } => SX_ERR_CONFLICT,
        ExchangeError::NotFound { .. } => SX_ERR_NOT_FOUND,
        ExchangeError::InvalidFormat { .. } => SX_ERR_INVALID_FORMAT,
        ExchangeError::LockTimeout { .. } => SX_ERR_LOCK_TIMEOUT,
        ExchangeError::InvalidState { .. } => SX_ERR_INVALID_STATE,
        ExchangeError::InvalidName { .. } => SX_ERR_INVALID_NAME,
    }
}

/// Borrow a C string, `None` when null or not UTF-8
unsafe fn str_arg<'a>(s: *const c_char) -> Option<&'a str> {
    if s.is_null() {
        return None;
    }
    CStr::from_ptr(s).to_str().ok()
}

/// Build a configuration; null names keep the protocol defaults
unsafe fn config_arg(region: *const c_char, mutex: *const c_char) -> Option<ExchangeConfig> {
    let mut config = ExchangeConfig::default();
    if !region.is_null() {
        config.region_name = str_arg(region)?.to_string();
    }
    if !mutex.is_null() {
        config.mutex_name = str_arg(mutex)?.to_string();
    }
    Some(config)
}

// --- Producer Side ---

/// Create an unpublished producer with an empty topology
///
/// # Safety
/// `region` and `mutex` must be null or valid null-terminated strings
#[no_mangle]
pub unsafe extern "C" fn sx_producer_new(
    region: *const c_char,
    mutex: *const c_char,
) -> *mut SxProducerHandle {
    match config_arg(region, mutex) {
        Some(config) => Box::into_raw(Box::new(SxProducerHandle(Producer::new(Topology::new(), config)))),
        None => ptr::null_mut(),
    }
}

/// Add a sensor. Returns its index, or a negative status.
///
/// # Safety
/// `handle` must come from `sx_producer_new`; `name` must be a valid string
#[no_mangle]
pub unsafe extern "C" fn sx_producer_add_sensor(
    handle: *mut SxProducerHandle,
    id: u32,
    instance: u32,
    name: *const c_char,
) -> i64 {
    if handle.is_null() {
        return SX_ERR_ARGUMENT as i64;
    }
    let producer = &mut (*handle).0;
    let Some(name) = str_arg(name) else {
        return SX_ERR_ARGUMENT as i64;
    };
    match producer.add_sensor(id, instance, name) {
        Ok(sensor) => sensor.index() as i64,
        Err(e) => status(&e) as i64,
    }
}

/// Add an entry owned by the sensor at `sensor_index`.
///
/// # Safety
/// `handle` must come from `sx_producer_new`; `name` and `units` must be valid strings
#[no_mangle]
pub unsafe extern "C" fn sx_producer_add_entry(
    handle: *mut SxProducerHandle,
    sensor_index: u32,
    id: u32,
    entry_type: u32,
    name: *const c_char,
    units: *const c_char,
    value: f64,
) -> i32 {
    if handle.is_null() {
        return SX_ERR_ARGUMENT;
    }
    let producer = &mut (*handle).0;
    let (Some(name), Some(units), Some(entry_type)) =
        (str_arg(name), str_arg(units), EntryType::from_code(entry_type))
    else {
        return SX_ERR_ARGUMENT;
    };

    let spec = EntrySpec::new(id, name, units, entry_type).with_value(value);
    match producer.add_entry(SensorHandle(sensor_index as usize), spec) {
        Ok(Some(_)) => SX_OK,
        Ok(None) => SX_ERR_ARGUMENT,
        Err(e) => status(&e),
    }
}

/// Publish the topology
///
/// # Safety
/// `handle` must come from `sx_producer_new`
#[no_mangle]
pub unsafe extern "C" fn sx_producer_create(handle: *mut SxProducerHandle) -> i32 {
    if handle.is_null() {
        return SX_ERR_ARGUMENT;
    }
    match (*handle).0.create() {
        Ok(()) => SX_OK,
        Err(e) => status(&e),
    }
}

/// Stage a value on every entry with `entry_id`. Returns the match count.
///
/// # Safety
/// `handle` must come from `sx_producer_new`
#[no_mangle]
pub unsafe extern "C" fn sx_producer_update_value(
    handle: *mut SxProducerHandle,
    entry_id: u32,
    value: f64,
) -> i32 {
    if handle.is_null() {
        return SX_ERR_ARGUMENT;
    }
    (*handle).0.set_value_by_id(entry_id, value) as i32
}

/// Flush staged values
///
/// Returns `SX_OK`, `SX_ERR_LOCK_TIMEOUT` if the cycle was skipped, or
/// `SX_ERR_INVALID_STATE` if the producer is not published.
///
/// # Safety
/// `handle` must come from `sx_producer_new`
#[no_mangle]
pub unsafe extern "C" fn sx_producer_flush(handle: *mut SxProducerHandle) -> i32 {
    if handle.is_null() {
        return SX_ERR_ARGUMENT;
    }
    match (*handle).0.flush() {
        FlushOutcome::Flushed => SX_OK,
        FlushOutcome::LockTimedOut => SX_ERR_LOCK_TIMEOUT,
        FlushOutcome::NotPublished => SX_ERR_INVALID_STATE,
    }
}

/// Close and destroy a producer handle
///
/// # Safety
/// `handle` must be null or come from `sx_producer_new`, and not be used afterwards
#[no_mangle]
pub unsafe extern "C" fn sx_producer_destroy(handle: *mut SxProducerHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

// --- Consumer Side ---

/// Connect to a published region; null selects the protocol default.
///
/// Returns null if the region is missing or invalid.
///
/// # Safety
/// `region` must be null or a valid null-terminated string
#[no_mangle]
pub unsafe extern "C" fn sx_consumer_connect(region: *const c_char) -> *mut SxConsumerHandle {
    let Some(config) = config_arg(region, ptr::null()) else {
        return ptr::null_mut();
    };
    match Consumer::connect(&config) {
        Ok(consumer) => Box::into_raw(Box::new(SxConsumerHandle(consumer))),
        Err(_) => ptr::null_mut(),
    }
}

unsafe fn snapshot_of(handle: *mut SxConsumerHandle) -> Result<Snapshot, i32> {
    if handle.is_null() {
        return Err(SX_ERR_ARGUMENT);
    }
    (*handle).0.snapshot().map_err(|e| status(&e))
}

/// Number of entries currently published, or a negative status
///
/// # Safety
/// `handle` must come from `sx_consumer_connect`
#[no_mangle]
pub unsafe extern "C" fn sx_consumer_entry_count(handle: *mut SxConsumerHandle) -> i64 {
    match snapshot_of(handle) {
        Ok(snapshot) => snapshot.entries.len() as i64,
        Err(code) => code as i64,
    }
}

/// Read the current value of the first entry with `entry_id`
///
/// # Safety
/// `handle` must come from `sx_consumer_connect`; `out` must be valid for writes
#[no_mangle]
pub unsafe extern "C" fn sx_consumer_read_value(
    handle: *mut SxConsumerHandle,
    entry_id: u32,
    out: *mut f64,
) -> i32 {
    if out.is_null() {
        return SX_ERR_ARGUMENT;
    }
    let snapshot = match snapshot_of(handle) {
        Ok(snapshot) => snapshot,
        Err(code) => return code,
    };
    match snapshot.find_entry(entry_id) {
        Some(entry) => {
            *out = entry.value;
            SX_OK
        }
        None => SX_ERR_NOT_FOUND,
    }
}

/// Destroy a consumer handle
///
/// # Safety
/// `handle` must be null or come from `sx_consumer_connect`, and not be used afterwards
#[no_mangle]
pub unsafe extern "C" fn sx_consumer_destroy(handle: *mut SxConsumerHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}
