//! In-process transport.
//!
//! [`Loopback`] implements [`Transport`] without touching the network. All
//! callbacks (state changes, send and receive completions) run on one
//! dispatch thread owned by the loopback, so they always arrive from a thread
//! the caller does not control, just like a real substrate.
//!
//! The far end of every connection is scripted by the test through a
//! [`Peer`]:
//!
//! ```
//! use nwio::native::{SocketKind, Transport, loopback::Loopback};
//! use std::time::Duration;
//!
//! let net = Loopback::new().unwrap();
//! let peer = net.listen("127.0.0.1:7000".parse().unwrap()).unwrap();
//!
//! let params = net.create_parameters(SocketKind::Stream);
//! let remote = net.create_endpoint(peer.addr());
//! let conn = net.create_connection(remote.as_ref().unwrap(), params.as_ref().unwrap());
//! net.start(conn.as_ref().unwrap());
//!
//! let server_side = peer.accept_timeout(Duration::from_secs(5)).unwrap();
//! server_side.send(b"hello");
//! # net.cancel(conn.as_ref().unwrap());
//! ```
//!
//! Connecting a stream to an address nobody listens on fails with
//! `ECONNREFUSED`. Datagram connections are ready immediately; what they send
//! is dropped unless a peer listens. Explicitly bound local addresses are
//! exclusive unless reuse-address is set, otherwise the connection fails
//! with `EADDRINUSE`.

use std::{
  collections::{HashMap, VecDeque},
  fmt, io,
  net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
  sync::{
    Arc,
    atomic::{AtomicU32, AtomicUsize, Ordering},
  },
  thread,
  time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::{
  error::NativeError,
  handle::NwPtr,
  native::{
    ConnectionState, ReceiveCompletion, Received, SendCompletion, SocketKind, StateHandler,
    Transport,
  },
  sync::Mutex,
};

type Job = Box<dyn FnOnce() + Send>;

const EPHEMERAL_FIRST: u32 = 49152;
const EPHEMERAL_COUNT: u32 = 16384;

#[derive(Default)]
struct Counters {
  parameters: AtomicUsize,
  connections: AtomicUsize,
  endpoints: AtomicUsize,
  data: AtomicUsize,
}

#[derive(Clone, Copy)]
enum ObjectKind {
  Parameters,
  Connection,
  Endpoint,
  Data,
}

impl Counters {
  fn slot(&self, kind: ObjectKind) -> &AtomicUsize {
    match kind {
      ObjectKind::Parameters => &self.parameters,
      ObjectKind::Connection => &self.connections,
      ObjectKind::Endpoint => &self.endpoints,
      ObjectKind::Data => &self.data,
    }
  }
}

/// Number of native objects currently alive, per type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveObjects {
  pub parameters: usize,
  pub connections: usize,
  pub endpoints: usize,
  pub data: usize,
}

impl LiveObjects {
  pub fn total(&self) -> usize {
    self.parameters + self.connections + self.endpoints + self.data
  }
}

struct LiveGuard {
  counters: Arc<Counters>,
  kind: ObjectKind,
}

impl LiveGuard {
  fn new(counters: &Arc<Counters>, kind: ObjectKind) -> Self {
    counters.slot(kind).fetch_add(1, Ordering::SeqCst);
    Self { counters: counters.clone(), kind }
  }
}

impl Drop for LiveGuard {
  fn drop(&mut self) {
    self.counters.slot(self.kind).fetch_sub(1, Ordering::SeqCst);
  }
}

struct Net {
  dispatch: Sender<Job>,
  counters: Arc<Counters>,
  listeners: Mutex<HashMap<SocketAddr, Sender<PeerConnection>>>,
  bound: Mutex<HashMap<SocketAddr, usize>>,
  next_port: AtomicU32,
}

impl Net {
  fn dispatch(&self, job: impl FnOnce() + Send + 'static) {
    if self.dispatch.send(Box::new(job)).is_err() {
      tracing::warn!("loopback dispatch thread is gone, dropping callback");
    }
  }

  /// Registers a use of `addr` as a local address.
  fn claim(&self, addr: SocketAddr, reuse: bool) -> bool {
    let mut bound = self.bound.lock();
    let users = bound.entry(addr).or_insert(0);
    if *users > 0 && !reuse {
      return false;
    }
    *users += 1;
    true
  }

  fn unclaim(&self, addr: SocketAddr) {
    let mut bound = self.bound.lock();
    if let Some(users) = bound.get_mut(&addr) {
      *users -= 1;
      if *users == 0 {
        bound.remove(&addr);
      }
    }
  }

  fn ephemeral(&self, like: IpAddr) -> SocketAddr {
    let n = self.next_port.fetch_add(1, Ordering::Relaxed);
    let port = (EPHEMERAL_FIRST + n % EPHEMERAL_COUNT) as u16;
    let ip = match like {
      IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
      IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
    };
    SocketAddr::new(ip, port)
  }
}

/// An in-process transport. Clones share the same network.
#[derive(Clone)]
pub struct Loopback {
  net: Arc<Net>,
}

impl Loopback {
  pub fn new() -> io::Result<Self> {
    let (tx, rx) = crossbeam_channel::unbounded::<Job>();
    thread::Builder::new().name("nwio-loopback".into()).spawn(move || {
      for job in rx {
        job();
      }
    })?;

    Ok(Self {
      net: Arc::new(Net {
        dispatch: tx,
        counters: Arc::default(),
        listeners: Mutex::new(HashMap::new()),
        bound: Mutex::new(HashMap::new()),
        next_port: AtomicU32::new(0),
      }),
    })
  }

  /// Starts accepting connections to `addr`.
  pub fn listen(&self, addr: SocketAddr) -> io::Result<Peer> {
    let mut listeners = self.net.listeners.lock();
    if listeners.contains_key(&addr) {
      return Err(io::Error::from(io::ErrorKind::AddrInUse));
    }
    let (tx, rx) = crossbeam_channel::unbounded();
    listeners.insert(addr, tx);
    Ok(Peer { net: self.net.clone(), addr, incoming: rx })
  }

  pub fn live_objects(&self) -> LiveObjects {
    let c = &self.net.counters;
    LiveObjects {
      parameters: c.parameters.load(Ordering::SeqCst),
      connections: c.connections.load(Ordering::SeqCst),
      endpoints: c.endpoints.load(Ordering::SeqCst),
      data: c.data.load(Ordering::SeqCst),
    }
  }

  /// Waits until every job queued so far on the dispatch thread has run.
  pub fn flush(&self, timeout: Duration) -> bool {
    let (tx, rx) = crossbeam_channel::bounded(1);
    self.net.dispatch(move || {
      let _ = tx.send(());
    });
    rx.recv_timeout(timeout).is_ok()
  }

  fn endpoint(&self, addr: SocketAddr) -> NwPtr<Endpoint> {
    NwPtr::from_arc(Arc::new(Endpoint {
      addr,
      _live: LiveGuard::new(&self.net.counters, ObjectKind::Endpoint),
    }))
  }

  fn data(&self, regions: Vec<Arc<[u8]>>) -> NwPtr<Data> {
    new_data(&self.net.counters, regions)
  }
}

fn new_data(counters: &Arc<Counters>, regions: Vec<Arc<[u8]>>) -> NwPtr<Data> {
  NwPtr::from_arc(Arc::new(Data { regions, _live: LiveGuard::new(counters, ObjectKind::Data) }))
}

#[derive(Clone, Default)]
struct Options {
  local: Option<SocketAddr>,
  reuse_address: bool,
  keepalive: bool,
  no_delay: bool,
}

pub struct Parameters {
  kind: SocketKind,
  options: Mutex<Options>,
  _live: LiveGuard,
}

pub struct Endpoint {
  addr: SocketAddr,
  _live: LiveGuard,
}

impl Endpoint {
  pub fn addr(&self) -> SocketAddr {
    self.addr
  }
}

impl PartialEq for Endpoint {
  fn eq(&self, other: &Self) -> bool {
    self.addr == other.addr
  }
}

impl fmt::Debug for Endpoint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Endpoint({})", self.addr)
  }
}

/// Possibly discontiguous bytes. Concatenation shares regions.
pub struct Data {
  regions: Vec<Arc<[u8]>>,
  _live: LiveGuard,
}

impl Data {
  pub fn len(&self) -> usize {
    self.regions.iter().map(|r| r.len()).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn region_count(&self) -> usize {
    self.regions.len()
  }

  pub fn to_vec(&self) -> Vec<u8> {
    self.regions.iter().flat_map(|r| r.iter().copied()).collect()
  }
}

pub struct Connection {
  inner: Arc<ConnInner>,
  _live: LiveGuard,
}

impl Drop for Connection {
  fn drop(&mut self) {
    // The last native reference is gone: tear down like an implicit cancel.
    let inner = self.inner.clone();
    self.inner.net.dispatch(move || inner.cancel_now());
  }
}

crate::native_object!(Parameters);
crate::native_object!(Endpoint);
crate::native_object!(Data);
crate::native_object!(Connection);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
  Setup,
  Ready,
  Failed,
  Cancelled,
}

enum ReadEnd {
  Eof,
  Error(NativeError),
}

struct PendingReceive {
  max: usize,
  completion: ReceiveCompletion<Data>,
}

struct ConnState {
  phase: Phase,
  handler: Option<StateHandler>,
  local: Option<SocketAddr>,
  bound: Option<SocketAddr>,
  outbound: Option<Sender<PeerEvent>>,
  write_closed: bool,
  stream: VecDeque<u8>,
  datagrams: VecDeque<Vec<u8>>,
  read_end: Option<ReadEnd>,
  receives: VecDeque<PendingReceive>,
}

struct ConnInner {
  net: Arc<Net>,
  kind: SocketKind,
  remote: SocketAddr,
  options: Options,
  state: Mutex<ConnState>,
}

type Ready = Vec<(ReceiveCompletion<Data>, Received<Data>)>;

fn run_ready(ready: Ready) {
  for (completion, received) in ready {
    completion(received);
  }
}

impl ConnInner {
  fn start_now(self: &Arc<Self>) {
    let mut state = self.state.lock();
    if state.phase != Phase::Setup {
      return;
    }
    let outcome = self.establish(&mut state);
    let handler = state.handler.clone();
    drop(state);

    tracing::trace!(remote = %self.remote, ?outcome, "loopback connection started");
    if let Some(handler) = handler {
      handler(ConnectionState::Preparing);
      handler(outcome);
    }
  }

  fn establish(self: &Arc<Self>, state: &mut ConnState) -> ConnectionState {
    let local = match self.options.local {
      Some(addr) => {
        if !self.net.claim(addr, self.options.reuse_address) {
          state.phase = Phase::Failed;
          return ConnectionState::Failed(NativeError::posix(libc::EADDRINUSE));
        }
        state.bound = Some(addr);
        addr
      }
      None => self.net.ephemeral(self.remote.ip()),
    };
    state.local = Some(local);

    let listener = self.net.listeners.lock().get(&self.remote).cloned();
    if let Some(listener) = listener {
      let (tx, rx) = crossbeam_channel::unbounded();
      let peer = PeerConnection { conn: self.clone(), events: rx };
      if listener.send(peer).is_ok() {
        state.outbound = Some(tx);
        state.phase = Phase::Ready;
        return ConnectionState::Ready;
      }
    }

    match self.kind {
      SocketKind::Datagram => {
        state.phase = Phase::Ready;
        ConnectionState::Ready
      }
      SocketKind::Stream => {
        state.phase = Phase::Failed;
        if let Some(addr) = state.bound.take() {
          self.net.unclaim(addr);
        }
        ConnectionState::Failed(NativeError::posix(libc::ECONNREFUSED))
      }
    }
  }

  fn cancel_now(&self) {
    let mut state = self.state.lock();
    if state.phase == Phase::Cancelled {
      return;
    }
    state.phase = Phase::Cancelled;
    state.outbound = None;
    if let Some(addr) = state.bound.take() {
      self.net.unclaim(addr);
    }
    let receives: Vec<_> = state.receives.drain(..).collect();
    let handler = state.handler.take();
    drop(state);

    for pending in receives {
      (pending.completion)(Received {
        content: NwPtr::null(),
        is_complete: false,
        error: Some(NativeError::posix(libc::ECANCELED)),
      });
    }
    if let Some(handler) = handler {
      handler(ConnectionState::Cancelled);
    }
  }

  fn withdraw_now(&self) {
    let receives: Vec<_> = self.state.lock().receives.drain(..).collect();
    if !receives.is_empty() {
      let withdrawn = receives.len();
      tracing::trace!(remote = %self.remote, withdrawn, "loopback receives withdrawn");
    }
    for pending in receives {
      (pending.completion)(Received {
        content: NwPtr::null(),
        is_complete: false,
        error: Some(NativeError::posix(libc::ECANCELED)),
      });
    }
  }

  fn send_now(&self, bytes: Vec<u8>, is_complete: bool, completion: SendCompletion) {
    let mut state = self.state.lock();
    let error = match state.phase {
      Phase::Cancelled => Some(NativeError::posix(libc::ECANCELED)),
      Phase::Ready => match &state.read_end {
        Some(ReadEnd::Error(err)) => Some(*err),
        _ if state.write_closed => Some(NativeError::posix(libc::EPIPE)),
        _ => None,
      },
      Phase::Setup | Phase::Failed => Some(NativeError::posix(libc::ENOTCONN)),
    };

    if error.is_none() {
      let finishes_stream = is_complete && self.kind == SocketKind::Stream;
      if let Some(outbound) = &state.outbound {
        if !bytes.is_empty() || self.kind == SocketKind::Datagram {
          let _ = outbound.send(PeerEvent::Data(bytes));
        }
        if finishes_stream {
          let _ = outbound.send(PeerEvent::Finished);
        }
      }
      if finishes_stream {
        state.write_closed = true;
      }
    }
    drop(state);

    completion(error);
  }

  fn receive_now(&self, max: usize, completion: ReceiveCompletion<Data>) {
    let mut state = self.state.lock();
    let error = match state.phase {
      Phase::Cancelled => Some(NativeError::posix(libc::ECANCELED)),
      Phase::Ready => None,
      Phase::Setup | Phase::Failed => Some(NativeError::posix(libc::ENOTCONN)),
    };
    if let Some(error) = error {
      drop(state);
      completion(Received { content: NwPtr::null(), is_complete: false, error: Some(error) });
      return;
    }

    state.receives.push_back(PendingReceive { max, completion });
    let ready = self.collect_ready(&mut state);
    drop(state);
    run_ready(ready);
  }

  fn collect_ready(&self, state: &mut ConnState) -> Ready {
    let mut ready = Vec::new();
    loop {
      let Some(front) = state.receives.front() else { break };
      let max = front.max.max(1);

      let received = match self.kind {
        SocketKind::Stream if !state.stream.is_empty() => {
          let n = max.min(state.stream.len());
          let bytes: Vec<u8> = state.stream.drain(..n).collect();
          Received {
            content: new_data(&self.net.counters, vec![Arc::from(bytes)]),
            is_complete: false,
            error: None,
          }
        }
        SocketKind::Datagram if !state.datagrams.is_empty() => {
          let mut message = state.datagrams.pop_front().unwrap_or_default();
          // Datagram semantics: whatever does not fit is gone.
          message.truncate(max);
          let regions = if message.is_empty() { Vec::new() } else { vec![Arc::from(message)] };
          let content = new_data(&self.net.counters, regions);
          Received { content, is_complete: true, error: None }
        }
        _ => match &state.read_end {
          Some(ReadEnd::Eof) => Received { content: NwPtr::null(), is_complete: true, error: None },
          Some(ReadEnd::Error(err)) => {
            Received { content: NwPtr::null(), is_complete: false, error: Some(*err) }
          }
          None => break,
        },
      };

      if let Some(pending) = state.receives.pop_front() {
        ready.push((pending.completion, received));
      }
    }
    ready
  }

  fn deliver_now(&self, bytes: Vec<u8>) {
    let mut state = self.state.lock();
    if state.phase != Phase::Ready || state.read_end.is_some() {
      return;
    }
    match self.kind {
      SocketKind::Stream => state.stream.extend(bytes),
      SocketKind::Datagram => state.datagrams.push_back(bytes),
    }
    let ready = self.collect_ready(&mut state);
    drop(state);
    run_ready(ready);
  }

  fn end_now(&self, end: ReadEnd) {
    let mut state = self.state.lock();
    if state.phase != Phase::Ready || state.read_end.is_some() {
      return;
    }
    let failure = match &end {
      ReadEnd::Error(err) => Some(*err),
      ReadEnd::Eof => None,
    };
    state.read_end = Some(end);
    let ready = self.collect_ready(&mut state);
    let handler = match failure {
      Some(_) => {
        state.outbound = None;
        state.handler.clone()
      }
      None => None,
    };
    drop(state);

    run_ready(ready);
    if let (Some(handler), Some(err)) = (handler, failure) {
      handler(ConnectionState::Failed(err));
    }
  }
}

/// Something the local side sent, as seen by the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
  Data(Vec<u8>),
  /// The local side finished its sending direction.
  Finished,
}

/// Listening end created by [`Loopback::listen`].
pub struct Peer {
  net: Arc<Net>,
  addr: SocketAddr,
  incoming: Receiver<PeerConnection>,
}

impl Peer {
  pub fn addr(&self) -> SocketAddr {
    self.addr
  }

  pub fn accept_timeout(&self, timeout: Duration) -> Option<PeerConnection> {
    self.incoming.recv_timeout(timeout).ok()
  }

  pub fn try_accept(&self) -> Option<PeerConnection> {
    self.incoming.try_recv().ok()
  }
}

impl Drop for Peer {
  fn drop(&mut self) {
    self.net.listeners.lock().remove(&self.addr);
  }
}

/// The far end of one connection.
pub struct PeerConnection {
  conn: Arc<ConnInner>,
  events: Receiver<PeerEvent>,
}

impl PeerConnection {
  /// The local address of the connecting side.
  pub fn remote_addr(&self) -> Option<SocketAddr> {
    self.conn.state.lock().local
  }

  pub fn local_addr(&self) -> SocketAddr {
    self.conn.remote
  }

  /// Delivers bytes (a whole datagram for datagram connections).
  pub fn send(&self, bytes: &[u8]) {
    let conn = self.conn.clone();
    let bytes = bytes.to_vec();
    self.conn.net.dispatch(move || conn.deliver_now(bytes));
  }

  /// Ends the stream: pending and future receives see end-of-file.
  pub fn close(&self) {
    let conn = self.conn.clone();
    self.conn.net.dispatch(move || conn.end_now(ReadEnd::Eof));
  }

  /// Fails the connection with `ECONNRESET`.
  pub fn reset(&self) {
    let conn = self.conn.clone();
    self
      .conn
      .net
      .dispatch(move || conn.end_now(ReadEnd::Error(NativeError::posix(libc::ECONNRESET))));
  }

  /// Next thing the local side sent. `None` on timeout or once the local
  /// connection is gone.
  pub fn recv_timeout(&self, timeout: Duration) -> Option<PeerEvent> {
    match self.events.recv_timeout(timeout) {
      Ok(event) => Some(event),
      Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
    }
  }

  /// Collects sent bytes until `len` bytes arrived, the sender finished, or
  /// `timeout` passed.
  pub fn read_timeout(&self, len: usize, timeout: Duration) -> Vec<u8> {
    let deadline = Instant::now() + timeout;
    let mut out = Vec::new();
    while out.len() < len {
      let left = deadline.saturating_duration_since(Instant::now());
      match self.recv_timeout(left) {
        Some(PeerEvent::Data(bytes)) => out.extend(bytes),
        Some(PeerEvent::Finished) | None => break,
      }
    }
    out
  }
}

impl Transport for Loopback {
  type Parameters = Parameters;
  type Connection = Connection;
  type Endpoint = Endpoint;
  type Data = Data;

  fn create_parameters(&self, kind: SocketKind) -> NwPtr<Parameters> {
    NwPtr::from_arc(Arc::new(Parameters {
      kind,
      options: Mutex::new(Options::default()),
      _live: LiveGuard::new(&self.net.counters, ObjectKind::Parameters),
    }))
  }

  fn copy_parameters(&self, parameters: &Parameters) -> NwPtr<Parameters> {
    NwPtr::from_arc(Arc::new(Parameters {
      kind: parameters.kind,
      options: Mutex::new(parameters.options.lock().clone()),
      _live: LiveGuard::new(&self.net.counters, ObjectKind::Parameters),
    }))
  }

  fn parameters_kind(&self, parameters: &Parameters) -> SocketKind {
    parameters.kind
  }

  fn set_local_endpoint(&self, parameters: &Parameters, endpoint: Option<&Endpoint>) {
    parameters.options.lock().local = endpoint.map(|e| e.addr);
  }

  fn local_endpoint(&self, parameters: &Parameters) -> NwPtr<Endpoint> {
    let local = parameters.options.lock().local;
    match local {
      Some(addr) => self.endpoint(addr),
      None => NwPtr::null(),
    }
  }

  fn set_reuse_local_address(&self, parameters: &Parameters, reuse: bool) {
    parameters.options.lock().reuse_address = reuse;
  }

  fn reuse_local_address(&self, parameters: &Parameters) -> bool {
    parameters.options.lock().reuse_address
  }

  fn set_keepalive(&self, parameters: &Parameters, enable: bool) {
    parameters.options.lock().keepalive = enable;
  }

  fn keepalive(&self, parameters: &Parameters) -> bool {
    parameters.options.lock().keepalive
  }

  fn set_no_delay(&self, parameters: &Parameters, enable: bool) {
    parameters.options.lock().no_delay = enable;
  }

  fn no_delay(&self, parameters: &Parameters) -> bool {
    parameters.options.lock().no_delay
  }

  fn create_endpoint(&self, addr: SocketAddr) -> NwPtr<Endpoint> {
    self.endpoint(addr)
  }

  fn endpoint_address(&self, endpoint: &Endpoint) -> Option<SocketAddr> {
    Some(endpoint.addr)
  }

  fn create_connection(&self, endpoint: &Endpoint, parameters: &Parameters) -> NwPtr<Connection> {
    let inner = Arc::new(ConnInner {
      net: self.net.clone(),
      kind: parameters.kind,
      remote: endpoint.addr,
      options: parameters.options.lock().clone(),
      state: Mutex::new(ConnState {
        phase: Phase::Setup,
        handler: None,
        local: None,
        bound: None,
        outbound: None,
        write_closed: false,
        stream: VecDeque::new(),
        datagrams: VecDeque::new(),
        read_end: None,
        receives: VecDeque::new(),
      }),
    });
    NwPtr::from_arc(Arc::new(Connection {
      inner,
      _live: LiveGuard::new(&self.net.counters, ObjectKind::Connection),
    }))
  }

  fn set_state_changed_handler(&self, connection: &Connection, handler: Option<StateHandler>) {
    connection.inner.state.lock().handler = handler;
  }

  fn start(&self, connection: &Connection) {
    let inner = connection.inner.clone();
    self.net.dispatch(move || inner.start_now());
  }

  fn cancel(&self, connection: &Connection) {
    let inner = connection.inner.clone();
    self.net.dispatch(move || inner.cancel_now());
  }

  fn cancel_receives(&self, connection: &Connection) {
    let inner = connection.inner.clone();
    self.net.dispatch(move || inner.withdraw_now());
  }

  fn connection_local_endpoint(&self, connection: &Connection) -> NwPtr<Endpoint> {
    let local = connection.inner.state.lock().local;
    match local {
      Some(addr) => self.endpoint(addr),
      None => NwPtr::null(),
    }
  }

  fn connection_remote_endpoint(&self, connection: &Connection) -> NwPtr<Endpoint> {
    self.endpoint(connection.inner.remote)
  }

  fn send(
    &self,
    connection: &Connection,
    content: Option<&Data>,
    is_complete: bool,
    completion: SendCompletion,
  ) {
    let bytes = content.map(Data::to_vec).unwrap_or_default();
    let inner = connection.inner.clone();
    self.net.dispatch(move || inner.send_now(bytes, is_complete, completion));
  }

  fn receive(
    &self,
    connection: &Connection,
    _min: usize,
    max: usize,
    completion: ReceiveCompletion<Data>,
  ) {
    let inner = connection.inner.clone();
    self.net.dispatch(move || inner.receive_now(max, completion));
  }

  fn create_data(&self, bytes: &[u8]) -> NwPtr<Data> {
    let regions = if bytes.is_empty() { Vec::new() } else { vec![Arc::from(bytes)] };
    self.data(regions)
  }

  fn concat_data(&self, head: &Data, tail: &Data) -> NwPtr<Data> {
    let regions = head.regions.iter().chain(tail.regions.iter()).cloned().collect();
    self.data(regions)
  }

  fn data_size(&self, data: &Data) -> usize {
    data.len()
  }

  fn apply_data(&self, data: &Data, f: &mut dyn FnMut(&[u8]) -> bool) -> bool {
    data.regions.iter().all(|region| f(region))
  }
}
