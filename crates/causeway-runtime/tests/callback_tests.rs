//! Integration tests for callback-interface dispatch: registration
//! ordering, the trampoline status protocol, and the full
//! native→managed→native round trip against the fake native side in
//! `common`.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use causeway_runtime::abi::{CallStatus, NativeBuffer};
use causeway_runtime::{
    call, encode_to_vec, lift_from_buffer, lower_into_buffer, BridgeError, BufferReader,
    CallbackDispatch, CallbackError, CallbackInterface, CallbackReply, InterfaceDescriptor,
    WireCodec, CALLBACK_RETIRED, CALLBACK_SUCCESS, CALLBACK_UNEXPECTED_ERROR, METHOD_RETIRE,
};
use common::{
    double_free_count, live_allocations, native_side_trampoline, record_trampoline,
    stage_argument_buffer, tracked_allocator,
};
use serial_test::serial;

/// A managed implementation of the `responder` callback interface:
/// method 1 `respond(message: String) -> String`.
struct EchoResponder {
    reply: String,
    seen: Mutex<Vec<String>>,
    invocations: AtomicUsize,
    panic_on_call: bool,
    fail_on_call: bool,
}

impl EchoResponder {
    fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            seen: Mutex::new(Vec::new()),
            invocations: AtomicUsize::new(0),
            panic_on_call: false,
            fail_on_call: false,
        })
    }

    fn panicking() -> Arc<Self> {
        Arc::new(Self {
            panic_on_call: true,
            ..Self::plain()
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail_on_call: true,
            ..Self::plain()
        })
    }

    fn plain() -> Self {
        Self {
            reply: "ok".to_string(),
            seen: Mutex::new(Vec::new()),
            invocations: AtomicUsize::new(0),
            panic_on_call: false,
            fail_on_call: false,
        }
    }
}

impl CallbackDispatch for EchoResponder {
    fn invoke_method(
        &self,
        method: i32,
        args: &mut BufferReader<'_>,
    ) -> Result<CallbackReply, CallbackError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        match method {
            1 => {
                let message = String::read(args)?;
                if self.panic_on_call {
                    panic!("responder exploded on {message}");
                }
                if self.fail_on_call {
                    return Err(CallbackError::Implementation {
                        message: format!("cannot respond to {message}"),
                    });
                }
                self.seen.lock().unwrap().push(message);
                CallbackReply::encode(&self.reply).map_err(CallbackError::from)
            }
            other => Err(CallbackError::Implementation {
                message: format!("unexpected method {other}"),
            }),
        }
    }
}

fn responders() -> &'static CallbackInterface<EchoResponder> {
    static RESPONDERS: OnceLock<CallbackInterface<EchoResponder>> = OnceLock::new();
    RESPONDERS
        .get_or_init(|| CallbackInterface::new(InterfaceDescriptor::new("responder", &["respond"])))
}

unsafe extern "C" fn responder_trampoline(
    handle: u64,
    method: i32,
    args: NativeBuffer,
    out: *mut NativeBuffer,
) -> i32 {
    responders().handle_raw_call(handle, method, args, out)
}

fn register_responders() {
    unsafe {
        responders().register(tracked_allocator(), record_trampoline, responder_trampoline);
    }
}

/// Invoke the registered trampoline the way the native side does,
/// passing the streamed form of `message` as the argument buffer.
fn native_invoke(handle: u64, method: i32, message: &str) -> (i32, Option<Vec<u8>>) {
    let allocator = tracked_allocator();
    let args = stage_argument_buffer(&allocator, &encode_to_vec(&message.to_string()).unwrap());
    let mut out = NativeBuffer::empty();
    let status = unsafe { native_side_trampoline()(handle, method, args, &mut out) };
    if out.is_empty() {
        (status, None)
    } else {
        let bytes = out.as_slice().to_vec();
        allocator.free(out).unwrap();
        (status, Some(bytes))
    }
}

fn decode_reply(bytes: &[u8]) -> String {
    let mut reader = BufferReader::new(bytes);
    let reply = String::read(&mut reader).unwrap();
    assert_eq!(reader.remaining(), 0);
    reply
}

#[test]
fn test_lower_before_registration_is_an_error() {
    // A fresh interface, never registered with the native side.
    let orphan: CallbackInterface<EchoResponder> =
        CallbackInterface::new(InterfaceDescriptor::new("orphan", &["respond"]));
    let err = orphan.lower(&EchoResponder::new("x")).unwrap_err();
    assert!(matches!(err, BridgeError::Protocol { .. }));
}

#[test]
#[serial]
fn test_registration_is_idempotent() {
    register_responders();
    assert!(responders().is_registered());
    register_responders();
    assert!(responders().is_registered());
}

#[test]
#[serial]
fn test_lower_is_idempotent_per_instance() {
    register_responders();
    let responder = EchoResponder::new("moo");
    let first = responders().lower(&responder).unwrap();
    let second = responders().lower(&responder).unwrap();
    assert_eq!(first, second);
}

#[test]
#[serial]
fn test_dispatch_decodes_invokes_and_encodes() {
    register_responders();
    let responder = EchoResponder::new("baa");
    let handle = responders().lower(&responder).unwrap();

    let live_before = live_allocations();
    let (status, reply) = native_invoke(handle.as_u64(), 1, "shear time");

    assert_eq!(status, CALLBACK_SUCCESS);
    assert_eq!(decode_reply(&reply.unwrap()), "baa");
    assert_eq!(*responder.seen.lock().unwrap(), vec!["shear time".to_string()]);
    assert_eq!(live_allocations(), live_before, "argument or reply buffer leaked");
}

#[test]
#[serial]
fn test_retire_removes_handle_and_produces_no_output() {
    register_responders();
    let responder = EchoResponder::new("oink");
    let handle = responders().lower(&responder).unwrap();
    let live_handles_before = responders().live_handles();

    let (status, reply) = native_invoke(handle.as_u64(), METHOD_RETIRE, "");
    assert_eq!(status, CALLBACK_RETIRED);
    assert!(reply.is_none());
    assert_eq!(responders().live_handles(), live_handles_before - 1);

    // No further callbacks are possible on the retired handle.
    let (status, reply) = native_invoke(handle.as_u64(), 1, "anyone there?");
    assert_eq!(status, CALLBACK_UNEXPECTED_ERROR);
    let message = String::from_utf8(reply.unwrap()).unwrap();
    assert!(message.contains("no live handle"));
    assert_eq!(responder.invocations.load(Ordering::SeqCst), 0);
}

#[test]
#[serial]
fn test_failing_implementation_downgrades_to_error_status() {
    register_responders();
    let responder = EchoResponder::failing();
    let handle = responders().lower(&responder).unwrap();

    let (status, reply) = native_invoke(handle.as_u64(), 1, "please");
    assert_eq!(status, CALLBACK_UNEXPECTED_ERROR);
    let message = String::from_utf8(reply.unwrap()).unwrap();
    assert!(message.contains("cannot respond to please"));
}

#[test]
#[serial]
fn test_panicking_implementation_never_unwinds_across_boundary() {
    register_responders();
    let responder = EchoResponder::panicking();
    let handle = responders().lower(&responder).unwrap();

    let live_before = live_allocations();
    let (status, reply) = native_invoke(handle.as_u64(), 1, "boom");
    assert_eq!(status, CALLBACK_UNEXPECTED_ERROR);
    let message = String::from_utf8(reply.unwrap()).unwrap();
    assert!(message.contains("responder exploded"));
    assert_eq!(live_allocations(), live_before, "argument buffer leaked on panic path");
}

#[test]
#[serial]
fn test_out_of_range_method_fails_without_invoking() {
    register_responders();
    let responder = EchoResponder::new("neigh");
    let handle = responders().lower(&responder).unwrap();

    let (status, reply) = native_invoke(handle.as_u64(), 7, "hello?");
    assert_eq!(status, CALLBACK_UNEXPECTED_ERROR);
    let message = String::from_utf8(reply.unwrap()).unwrap();
    assert!(message.contains("method index 7 out of range"));
    assert_eq!(responder.invocations.load(Ordering::SeqCst), 0);
}

// The fake native aggregate operation: calls back into two registered
// handles in sequence, forwarding the message it was given, and returns
// the streamed concatenation of their replies.
unsafe extern "C" fn native_speak_to_all(
    first: u64,
    second: u64,
    message: NativeBuffer,
    status: *mut CallStatus,
) -> NativeBuffer {
    let allocator = tracked_allocator();
    let trampoline = native_side_trampoline();
    let message_bytes = message.as_slice().to_vec();
    // The aggregate op owns the message buffer it was handed.
    allocator.free(message).unwrap();

    let mut replies = Vec::new();
    for handle in [first, second] {
        let args = stage_argument_buffer(&allocator, &message_bytes);
        let mut out = NativeBuffer::empty();
        let callback_status = trampoline(handle, 1, args, &mut out);
        if callback_status != CALLBACK_SUCCESS {
            (*status).code = causeway_runtime::CALL_ERROR;
            (*status).error_buf =
                stage_argument_buffer(&allocator, b"callback refused the roll call");
            if !out.is_empty() {
                allocator.free(out).unwrap();
            }
            return NativeBuffer::empty();
        }
        let mut reader = BufferReader::new(out.as_slice());
        replies.push(String::read(&mut reader).unwrap());
        allocator.free(out).unwrap();
    }

    let joined = replies.join("|");
    stage_argument_buffer(&allocator, &encode_to_vec(&joined).unwrap())
}

#[test]
#[serial]
fn test_end_to_end_aggregate_roll_call() {
    register_responders();
    let allocator = tracked_allocator();

    let a = EchoResponder::new("cluck");
    let b = EchoResponder::new("quack");
    let handle_a = responders().lower(&a).unwrap();
    let handle_b = responders().lower(&b).unwrap();

    let live_before = live_allocations();
    let doubles_before = double_free_count();

    let message = "état du pré 🌾".to_string();
    let message_buf = lower_into_buffer(&message, &allocator).unwrap();
    let result_buf = call(&allocator, |status| unsafe {
        native_speak_to_all(handle_a.as_u64(), handle_b.as_u64(), message_buf, status)
    })
    .unwrap();
    let joined: String = lift_from_buffer(result_buf, &allocator).unwrap();

    // Each instance saw exactly the string sent, and the native side got
    // each declared reply back unmodified.
    assert_eq!(joined, "cluck|quack");
    assert_eq!(*a.seen.lock().unwrap(), vec![message.clone()]);
    assert_eq!(*b.seen.lock().unwrap(), vec![message.clone()]);

    assert_eq!(live_allocations(), live_before, "aggregate call leaked buffers");
    assert_eq!(double_free_count(), doubles_before);

    // The native side is finished with both instances: one retirement
    // each, after which no callback can reach them.
    let (status, _) = native_invoke(handle_a.as_u64(), METHOD_RETIRE, "");
    assert_eq!(status, CALLBACK_RETIRED);
    let (status, _) = native_invoke(handle_b.as_u64(), METHOD_RETIRE, "");
    assert_eq!(status, CALLBACK_RETIRED);

    let invocations_a = a.invocations.load(Ordering::SeqCst);
    let (status, _) = native_invoke(handle_a.as_u64(), 1, "still there?");
    assert_eq!(status, CALLBACK_UNEXPECTED_ERROR);
    assert_eq!(a.invocations.load(Ordering::SeqCst), invocations_a);
}
