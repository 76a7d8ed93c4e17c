//! Secure socket state machine against a scripted TLS library
//!
//! These tests replace OpenSSL with a library whose result codes are fixed
//! in advance, so handshake, EOF and error paths can be driven exactly.

use libc::{c_int, c_ulong};
use secure_socket::net::SocketOps;
use secure_socket::tls::init::{LockingCallback, ThreadIdCallback};
use secure_socket::tls::{
    ContextConfig, CryptoLibraryState, ErrorClass, SecureSocket, SessionHandle, SessionState,
    TlsContext, TlsError, TlsLibrary, MAX_RECORD_LEN,
};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::OnceLock;

thread_local! {
    static ERROR_QUEUE: RefCell<VecDeque<c_ulong>> = RefCell::new(VecDeque::new());
    static REFUSE_SESSIONS: Cell<bool> = Cell::new(false);
}

/// One scripted library call: result code, plaintext, classification
struct Step {
    ret: c_int,
    data: Vec<u8>,
    class: ErrorClass,
    queued: Option<c_ulong>,
}

impl Step {
    fn ok(ret: c_int) -> Self {
        Step {
            ret,
            data: Vec::new(),
            class: ErrorClass::None,
            queued: None,
        }
    }

    fn data(data: &[u8]) -> Self {
        Step {
            ret: data.len() as c_int,
            data: data.to_vec(),
            class: ErrorClass::None,
            queued: None,
        }
    }

    fn fail(ret: c_int, class: ErrorClass) -> Self {
        Step {
            ret,
            data: Vec::new(),
            class,
            queued: None,
        }
    }

    fn queue(mut self, code: c_ulong) -> Self {
        self.queued = Some(code);
        self
    }
}

#[derive(Default)]
struct ScriptedSession {
    fd: Option<RawFd>,
    refuse_fd: bool,
    auto_retry: bool,
    connect: VecDeque<Step>,
    accept: VecDeque<Step>,
    reads: VecDeque<Step>,
    writes: VecDeque<Step>,
    read_calls: usize,
    written: Vec<u8>,
    // Raw classification of the last scripted call, 0 = none
    class: c_int,
    // Plaintext the session claims to still buffer
    pending: c_int,
}

impl ScriptedSession {
    fn run(&mut self, step: Option<Step>, op: &str) -> (c_int, Vec<u8>) {
        let step = step.unwrap_or_else(|| panic!("unscripted {} call", op));
        self.class = step.class.as_raw();
        if let Some(code) = step.queued {
            ERROR_QUEUE.with(|q| q.borrow_mut().push_back(code));
        }
        (step.ret, step.data)
    }
}

impl SessionHandle for ScriptedSession {
    fn set_fd(&mut self, fd: RawFd) -> c_int {
        if self.refuse_fd {
            ERROR_QUEUE.with(|q| q.borrow_mut().push_back(0x1400_0080));
            return 0;
        }
        self.fd = Some(fd);
        1
    }

    fn fd(&self) -> RawFd {
        self.fd.unwrap_or(-1)
    }

    fn set_auto_retry(&mut self) {
        self.auto_retry = true;
    }

    fn connect(&mut self) -> c_int {
        let step = self.connect.pop_front();
        self.run(step, "connect").0
    }

    fn accept(&mut self) -> c_int {
        let step = self.accept.pop_front();
        self.run(step, "accept").0
    }

    fn read(&mut self, buf: &mut [u8]) -> c_int {
        self.read_calls += 1;
        assert_eq!(buf.len(), MAX_RECORD_LEN);
        let step = self.reads.pop_front();
        let (ret, data) = self.run(step, "read");
        buf[..data.len()].copy_from_slice(&data);
        ret
    }

    fn write(&mut self, buf: &[u8]) -> c_int {
        let step = self.writes.pop_front().unwrap_or_else(|| Step::ok(buf.len() as c_int));
        let (ret, _) = self.run(Some(step), "write");
        if ret > 0 {
            self.written.extend_from_slice(buf);
        }
        ret
    }

    fn shutdown(&mut self) -> c_int {
        0
    }

    fn get_error(&self, ret: c_int) -> c_int {
        if ret > 0 {
            ErrorClass::None.as_raw()
        } else {
            self.class
        }
    }

    fn pending(&self) -> c_int {
        self.pending
    }
}

struct ScriptedLibrary;

impl TlsLibrary for ScriptedLibrary {
    type Context = ();
    type Session = ScriptedSession;

    fn state_cell() -> &'static OnceLock<CryptoLibraryState> {
        static STATE: OnceLock<CryptoLibraryState> = OnceLock::new();
        &STATE
    }

    fn num_locks() -> usize {
        4
    }

    fn startup() {}

    fn set_callbacks(_locking: LockingCallback, _thread_id: ThreadIdCallback) {}

    fn new_context(_config: &ContextConfig) -> secure_socket::tls::Result<()> {
        Ok(())
    }

    fn new_session(_ctx: &()) -> Option<ScriptedSession> {
        if REFUSE_SESSIONS.with(Cell::get) {
            None
        } else {
            Some(ScriptedSession::default())
        }
    }

    fn get_error_queue() -> c_ulong {
        ERROR_QUEUE.with(|q| q.borrow_mut().pop_front().unwrap_or(0))
    }

    fn error_details() -> String {
        let drained: Vec<String> = ERROR_QUEUE
            .with(|q| q.borrow_mut().drain(..).collect::<Vec<_>>())
            .into_iter()
            .map(|code| format!("{:#x}", code))
            .collect();
        drained.join(", ")
    }
}

/// Library whose context allocation always fails
struct ExhaustedLibrary;

impl TlsLibrary for ExhaustedLibrary {
    type Context = ();
    type Session = ScriptedSession;

    fn state_cell() -> &'static OnceLock<CryptoLibraryState> {
        static STATE: OnceLock<CryptoLibraryState> = OnceLock::new();
        &STATE
    }

    fn num_locks() -> usize {
        1
    }

    fn startup() {}

    fn set_callbacks(_locking: LockingCallback, _thread_id: ThreadIdCallback) {}

    fn new_context(_config: &ContextConfig) -> secure_socket::tls::Result<()> {
        Err(TlsError::Ssl {
            op: "SSL_CTX_new",
            class: None,
            detail: "malloc failure".to_string(),
        })
    }

    fn new_session(_ctx: &()) -> Option<ScriptedSession> {
        None
    }

    fn get_error_queue() -> c_ulong {
        0
    }

    fn error_details() -> String {
        String::new()
    }
}

/// Socket that only counts readiness registrations
struct FakeSocket {
    fd: RawFd,
    reads: usize,
    writes: usize,
}

impl FakeSocket {
    fn new(fd: RawFd) -> Self {
        FakeSocket {
            fd,
            reads: 0,
            writes: 0,
        }
    }
}

impl AsRawFd for FakeSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl SocketOps for FakeSocket {
    fn register_read(&mut self) {
        self.reads += 1;
    }

    fn register_write(&mut self) {
        self.writes += 1;
    }
}

type ScriptedSocket = SecureSocket<FakeSocket, ScriptedLibrary>;

fn scripted(session: ScriptedSession) -> ScriptedSocket {
    SecureSocket::new(FakeSocket::new(7), Some(session)).unwrap()
}

fn established(mut session: ScriptedSession) -> ScriptedSocket {
    session.connect.push_back(Step::ok(1));
    let mut sock = scripted(session);
    sock.connect().unwrap();
    sock
}

#[test]
fn test_construction_binds_descriptor_and_auto_retry() {
    for fd in [0, 3, 7, 1023] {
        let sock: ScriptedSocket =
            SecureSocket::new(FakeSocket::new(fd), Some(ScriptedSession::default())).unwrap();
        assert_eq!(sock.session_fd(), fd);
        assert_eq!(sock.fd(), fd);
        assert!(sock.session().auto_retry);
        assert_eq!(sock.state(), SessionState::Created);
    }
}

#[test]
fn test_null_session_handle_rejected() {
    for fd in [0, 7, 1023] {
        let result = ScriptedSocket::new(FakeSocket::new(fd), None);
        assert!(matches!(result, Err(TlsError::InvalidSession)));
    }
}

#[test]
fn test_set_fd_failure_is_named() {
    let session = ScriptedSession {
        refuse_fd: true,
        ..Default::default()
    };
    let err = ScriptedSocket::new(FakeSocket::new(7), Some(session)).err().unwrap();
    assert_eq!(err.op(), Some("SSL_set_fd"));
    assert!(err.to_string().contains("0x14000080"));
}

#[test]
fn test_context_spawns_sessions() {
    let ctx = TlsContext::<ScriptedLibrary>::new(ContextConfig::client()).unwrap();
    let a = ctx.new_secure_socket(FakeSocket::new(5)).unwrap();
    let b = ctx.new_secure_socket(FakeSocket::new(6)).unwrap();
    assert_eq!(a.session_fd(), 5);
    assert_eq!(b.session_fd(), 6);
}

#[test]
fn test_context_session_allocation_failure() {
    let ctx = TlsContext::<ScriptedLibrary>::new(ContextConfig::client()).unwrap();

    REFUSE_SESSIONS.with(|r| r.set(true));
    let result = ctx.new_secure_socket(FakeSocket::new(5));
    REFUSE_SESSIONS.with(|r| r.set(false));
    assert!(matches!(result, Err(TlsError::InvalidSession)));

    // The context stays usable
    assert!(ctx.new_secure_socket(FakeSocket::new(5)).is_ok());
}

#[test]
fn test_context_creation_failure() {
    let result = TlsContext::<ExhaustedLibrary>::new(ContextConfig::client());
    let err = result.err().unwrap();
    assert_eq!(err.op(), Some("SSL_CTX_new"));
}

#[test]
fn test_connect_registers_read_and_write() {
    let sock = established(ScriptedSession::default());
    assert_eq!(sock.state(), SessionState::Established);
    assert_eq!(sock.socket().reads, 1);
    assert_eq!(sock.socket().writes, 1);
}

#[test]
fn test_connect_failure() {
    let mut session = ScriptedSession::default();
    session.connect.push_back(Step::fail(-1, ErrorClass::Syscall));
    let mut sock = scripted(session);

    let err = sock.connect().unwrap_err();
    assert_eq!(err.op(), Some("SSL_connect"));
    assert_eq!(err.class(), Some(ErrorClass::Syscall));
    assert_eq!(sock.state(), SessionState::Failed);
    assert_eq!(sock.socket().reads, 0);
    assert_eq!(sock.get_error(sock.last_return()), ErrorClass::Syscall);
}

#[test]
fn test_accept_success_registers_read_once() {
    let mut session = ScriptedSession::default();
    session.accept.push_back(Step::ok(1));
    let mut sock = scripted(session);

    sock.accept().unwrap();
    assert_eq!(sock.state(), SessionState::Established);
    assert_eq!(sock.socket().reads, 1);
    assert_eq!(sock.socket().writes, 0);
}

#[test]
fn test_accept_requires_exactly_one() {
    for (ret, class) in [(2, ErrorClass::None), (0, ErrorClass::Ssl), (-1, ErrorClass::Ssl)] {
        let mut session = ScriptedSession::default();
        session.accept.push_back(Step::fail(ret, class));
        let mut sock = scripted(session);

        let err = sock.accept().unwrap_err();
        assert_eq!(err.op(), Some("SSL_accept"));
        assert_eq!(sock.state(), SessionState::Failed);
        assert_eq!(sock.socket().reads, 0);
    }
}

#[test]
fn test_read_returns_record() {
    let mut session = ScriptedSession::default();
    session.reads.push_back(Step::data(b"GET / HTTP/1.1\r\n"));
    let mut sock = established(session);

    let data = sock.read().unwrap();
    assert_eq!(&data[..], b"GET / HTTP/1.1\r\n");
    assert_eq!(sock.socket().reads, 2);
    assert_eq!(sock.state(), SessionState::Established);
}

#[test]
fn test_read_full_record() {
    let record = vec![0x5a; MAX_RECORD_LEN];
    let mut session = ScriptedSession::default();
    session.reads.push_back(Step::data(&record));
    let mut sock = established(session);

    assert_eq!(sock.read().unwrap().len(), MAX_RECORD_LEN);
}

#[test]
fn test_clean_shutdown_is_eof() {
    let mut session = ScriptedSession::default();
    session.reads.push_back(Step::fail(0, ErrorClass::ZeroReturn));
    let mut sock = established(session);

    assert!(sock.read().unwrap().is_empty());
    assert!(sock.eof());
    assert_eq!(sock.state(), SessionState::Closed);
    assert_eq!(sock.socket().reads, 2);

    // Further reads stay empty without calling the library
    assert!(sock.read().unwrap().is_empty());
    assert!(sock.read().unwrap().is_empty());
    assert_eq!(sock.session().read_calls, 1);
}

#[test]
fn test_transport_close_is_eof_with_empty_queue() {
    let mut session = ScriptedSession::default();
    session.reads.push_back(Step::fail(0, ErrorClass::Syscall));
    let mut sock = established(session);

    assert!(sock.read().unwrap().is_empty());
    assert!(sock.eof());
    assert_eq!(sock.socket().reads, 2);
}

#[test]
fn test_transport_close_with_queued_error_raises() {
    let mut session = ScriptedSession::default();
    session
        .reads
        .push_back(Step::fail(0, ErrorClass::Syscall).queue(0x0a00_0126));
    let mut sock = established(session);

    let err = sock.read().unwrap_err();
    assert_eq!(err.op(), Some("SSL_read"));
    assert!(err.to_string().contains("0xa000126"));
    assert!(!sock.eof());
    assert_eq!(sock.state(), SessionState::Failed);
}

#[test]
fn test_zero_read_with_other_class_raises() {
    let mut session = ScriptedSession::default();
    session.reads.push_back(Step::fail(0, ErrorClass::Ssl));
    let mut sock = established(session);

    let err = sock.read().unwrap_err();
    assert_eq!(err.class(), Some(ErrorClass::Ssl));
    assert!(!sock.eof());
}

#[test]
fn test_negative_read_raises() {
    let mut session = ScriptedSession::default();
    session.reads.push_back(Step::fail(-1, ErrorClass::Ssl).queue(0x0a00_0119));
    let mut sock = established(session);

    let err = sock.read().unwrap_err();
    assert_eq!(err.op(), Some("SSL_read"));
    assert_eq!(err.class(), Some(ErrorClass::Ssl));
    assert_eq!(sock.state(), SessionState::Failed);
    assert_eq!(sock.socket().reads, 1);
}

#[test]
fn test_write_sends_whole_payload() {
    let mut sock = established(ScriptedSession::default());
    sock.write(b"hello").unwrap();
    sock.write(b" world").unwrap();

    assert_eq!(sock.session().written, b"hello world");
    assert_eq!(sock.socket().writes, 3);
    assert_eq!(sock.state(), SessionState::Established);
}

#[test]
fn test_empty_write_skips_library() {
    let mut session = ScriptedSession::default();
    // Would fail if the library were called
    session.writes.push_back(Step::fail(-1, ErrorClass::Ssl));
    let mut sock = established(session);

    sock.write(b"").unwrap();
    assert_eq!(sock.session().writes.len(), 1);
    assert_eq!(sock.socket().writes, 2);
}

#[test]
fn test_write_failure() {
    let mut session = ScriptedSession::default();
    session.writes.push_back(Step::fail(-1, ErrorClass::WantWrite));
    let mut sock = established(session);

    let err = sock.write(b"payload").unwrap_err();
    assert_eq!(err.op(), Some("SSL_write"));
    assert!(err.class().unwrap().is_retryable());
    assert_eq!(sock.state(), SessionState::Failed);
    assert_eq!(sock.socket().writes, 1);
}

#[test]
#[cfg(debug_assertions)]
#[should_panic(expected = "plaintext left buffered")]
fn test_leftover_plaintext_trips_assertion() {
    let mut session = ScriptedSession {
        pending: 5,
        ..Default::default()
    };
    session.reads.push_back(Step::data(b"first"));
    let mut sock = established(session);

    let _ = sock.read();
}
