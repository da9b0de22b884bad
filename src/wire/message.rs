//! Message variants, their ASN.1 BER tags, and the shared wire-level
//! vocabulary enums (response codes, client/job states, job control ops).
//!
//! Every variant encodes as a top-level SEQUENCE whose first child is the
//! integer `message_id` and whose second child is a context-tagged
//! constructed payload; the context tag number is this module's
//! [`variant_tag`] for that message.

use bytes::BytesMut;

use super::ber::{
    self, BerError, Reader, TAG_BOOLEAN, TAG_INTEGER, TAG_OCTET_STRING, TAG_SEQUENCE,
};

/// Context tag numbers for each message variant (see the
/// variant tags are application-specific tag numbers in the range [0, 63]").
mod tag {
    pub const CLIENT_HELLO: u8 = 0;
    pub const HELLO_RESPONSE: u8 = 1;
    pub const JOB_REQUEST: u8 = 2;
    pub const JOB_RESPONSE: u8 = 3;
    pub const JOB_CONTROL_REQUEST: u8 = 4;
    pub const JOB_CONTROL_RESPONSE: u8 = 5;
    pub const JOB_COMPLETED: u8 = 6;
    pub const STATUS_REQUEST: u8 = 7;
    pub const STATUS_RESPONSE: u8 = 8;
    pub const CLASS_TRANSFER_REQUEST: u8 = 9;
    pub const CLASS_TRANSFER_RESPONSE: u8 = 10;
    pub const KEEP_ALIVE: u8 = 11;
    pub const SERVER_SHUTDOWN: u8 = 12;
    pub const REGISTER_STATISTIC: u8 = 13;
    pub const REPORT_STATISTIC: u8 = 14;
    pub const MANAGER_HELLO: u8 = 15;
    pub const CREATE_CLIENT: u8 = 16;
    pub const CREATE_CLIENT_RESPONSE: u8 = 17;
    pub const DESTROY_CLIENT: u8 = 18;
    pub const DESTROY_CLIENT_RESPONSE: u8 = 19;
}

/// Sentinel written for an absent `i64` field (e.g. no `stopTime`).
/// Chosen rather than a dedicated OPTIONAL tag to keep the hand-rolled codec
/// flat: every field is read in fixed position, so the encoder and decoder
/// for a given variant always agree on shape.
pub const ABSENT_I64: i64 = i64::MIN;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ResponseCode {
    Success,
    LocalError,
    NoSuchJob,
    JobAlreadyStarted,
    JobRequestRefused,
    JobCreationFailure,
    ClassNotFound,
    ClassNotValid,
    UnsupportedControlType,
    ClientShutdown,
}

impl ResponseCode {
    fn to_i64(self) -> i64 {
        use ResponseCode::*;
        match self {
            Success => 0,
            LocalError => 1,
            NoSuchJob => 2,
            JobAlreadyStarted => 3,
            JobRequestRefused => 4,
            JobCreationFailure => 5,
            ClassNotFound => 6,
            ClassNotValid => 7,
            UnsupportedControlType => 8,
            ClientShutdown => 9,
        }
    }

    fn from_i64(v: i64) -> Result<Self, BerError> {
        use ResponseCode::*;
        Ok(match v {
            0 => Success,
            1 => LocalError,
            2 => NoSuchJob,
            3 => JobAlreadyStarted,
            4 => JobRequestRefused,
            5 => JobCreationFailure,
            6 => ClassNotFound,
            7 => ClassNotValid,
            8 => UnsupportedControlType,
            9 => ClientShutdown,
            _ => return Err(BerError::InvalidInteger(0)),
        })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ClientStateValue {
    NotConnected,
    Idle,
    JobNotYetStarted,
    RunningJob,
    ShuttingDown,
}

impl ClientStateValue {
    fn to_i64(self) -> i64 {
        use ClientStateValue::*;
        match self {
            NotConnected => 0,
            Idle => 1,
            JobNotYetStarted => 2,
            RunningJob => 3,
            ShuttingDown => 4,
        }
    }

    fn from_i64(v: i64) -> Result<Self, BerError> {
        use ClientStateValue::*;
        Ok(match v {
            0 => NotConnected,
            1 => Idle,
            2 => JobNotYetStarted,
            3 => RunningJob,
            4 => ShuttingDown,
            _ => return Err(BerError::InvalidInteger(0)),
        })
    }
}

/// Job lifecycle state, shared between the wire representation and the
/// internal job-runtime state machine.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum JobState {
    NotStarted,
    Running,
    Completed,
    StoppedByUser,
    StoppedByShutdown,
    Cancelled,
    StoppedDueToError,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobState::NotStarted | JobState::Running)
    }

    pub fn to_i64(self) -> i64 {
        use JobState::*;
        match self {
            NotStarted => 0,
            Running => 1,
            Completed => 2,
            StoppedByUser => 3,
            StoppedByShutdown => 4,
            Cancelled => 5,
            StoppedDueToError => 6,
        }
    }

    fn from_i64(v: i64) -> Result<Self, BerError> {
        use JobState::*;
        Ok(match v {
            0 => NotStarted,
            1 => Running,
            2 => Completed,
            3 => StoppedByUser,
            4 => StoppedByShutdown,
            5 => Cancelled,
            6 => StoppedDueToError,
            _ => return Err(BerError::InvalidInteger(0)),
        })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum JobControlOp {
    Start,
    Stop,
    StopAndWait,
    StopDueToShutdown,
}

impl JobControlOp {
    fn to_i64(self) -> i64 {
        use JobControlOp::*;
        match self {
            Start => 0,
            Stop => 1,
            StopAndWait => 2,
            StopDueToShutdown => 3,
        }
    }

    fn from_i64(v: i64) -> Result<Self, BerError> {
        use JobControlOp::*;
        Ok(match v {
            0 => Start,
            1 => Stop,
            2 => StopAndWait,
            3 => StopDueToShutdown,
            _ => return Err(BerError::InvalidInteger(0)),
        })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn to_i64(self) -> i64 {
        match self {
            LogLevel::Debug => 0,
            LogLevel::Info => 1,
            LogLevel::Warn => 2,
            LogLevel::Error => 3,
        }
    }

    fn from_i64(v: i64) -> Result<Self, BerError> {
        Ok(match v {
            0 => LogLevel::Debug,
            1 => LogLevel::Info,
            2 => LogLevel::Warn,
            3 => LogLevel::Error,
            _ => return Err(BerError::InvalidInteger(0)),
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LogEntry {
    pub timestamp_ms: i64,
    pub level: LogLevel,
    pub client_id: String,
    pub job_id: String,
    pub thread_id: String,
    pub message: String,
}

/// A named value carried in a `JobRequest.parameters` list.
#[derive(Clone, Debug, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub value: ParamValue,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Str(String),
    Bool(bool),
    Float(f64),
}

/// One reported tracker, as attached to `JobCompleted` or `StatusResponse`.
#[derive(Clone, Debug, PartialEq)]
pub struct StatTrackerData {
    pub display_name: String,
    pub thread_id: String,
    pub interval_seconds: u32,
    pub samples: Vec<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    ClientHello {
        client_id: String,
        software_version: String,
        auth_type: i64,
        auth_id: String,
        auth_credentials: Vec<u8>,
        restricted_mode: bool,
        supports_time_sync: bool,
    },
    HelloResponse {
        response_code: ResponseCode,
        server_time_ms: i64,
        protocol_minor_version: i64,
        supports_time_sync: bool,
        restricted_mode: bool,
    },
    JobRequest {
        job_id: String,
        job_class_name: String,
        threads_per_client: u32,
        client_number: u32,
        scheduled_start_time_ms: i64,
        stop_time_ms: i64, // ABSENT_I64 if unset
        duration_secs: i64,
        collection_interval_secs: u32,
        thread_startup_delay_ms: u32,
        parameters: Vec<Parameter>,
    },
    JobResponse {
        job_id: String,
        response_code: ResponseCode,
    },
    JobControlRequest {
        job_id: String,
        op: JobControlOp,
    },
    JobControlResponse {
        job_id: String,
        response_code: ResponseCode,
    },
    JobCompleted {
        job_id: String,
        final_state: JobState,
        actual_start_time_ms: i64,
        actual_stop_time_ms: i64,
        actual_duration_secs: i64,
        trackers: Vec<StatTrackerData>,
        log_messages: Vec<LogEntry>,
    },
    StatusRequest {
        job_id: String, // empty = none
    },
    StatusResponse {
        client_state: ClientStateValue,
        job_id: String,   // empty = none
        job_state: i64,   // ABSENT_I64 if no job, else JobState::to_i64
        trackers: Vec<StatTrackerData>,
        log_messages: Vec<LogEntry>,
    },
    ClassTransferRequest {
        class_name: String,
    },
    ClassTransferResponse {
        class_name: String,
        available: bool,
    },
    KeepAlive,
    ServerShutdown {
        reason: String,
    },
    RegisterStatistic {
        job_id: String,
        display_name: String,
        thread_id: String,
        interval_seconds: u32,
    },
    ReportStatistic {
        job_id: String,
        display_name: String,
        thread_id: String,
        interval_index: u32,
        value: f64,
    },
    /// Supervisor-port handshake: advertises capacity and an
    /// auto-create target instead of `ClientHello`'s auth/restricted fields.
    ManagerHello {
        manager_id: String,
        max_clients: u32,
        auto_create_clients: u32,
    },
    CreateClient {
        client_id: String,
    },
    CreateClientResponse {
        client_id: String,
        response_code: ResponseCode,
    },
    DestroyClient {
        client_id: String,
    },
    DestroyClientResponse {
        client_id: String,
        response_code: ResponseCode,
    },
}

impl Message {
    pub fn variant_tag(&self) -> u8 {
        match self {
            Message::ClientHello { .. } => tag::CLIENT_HELLO,
            Message::HelloResponse { .. } => tag::HELLO_RESPONSE,
            Message::JobRequest { .. } => tag::JOB_REQUEST,
            Message::JobResponse { .. } => tag::JOB_RESPONSE,
            Message::JobControlRequest { .. } => tag::JOB_CONTROL_REQUEST,
            Message::JobControlResponse { .. } => tag::JOB_CONTROL_RESPONSE,
            Message::JobCompleted { .. } => tag::JOB_COMPLETED,
            Message::StatusRequest { .. } => tag::STATUS_REQUEST,
            Message::StatusResponse { .. } => tag::STATUS_RESPONSE,
            Message::ClassTransferRequest { .. } => tag::CLASS_TRANSFER_REQUEST,
            Message::ClassTransferResponse { .. } => tag::CLASS_TRANSFER_RESPONSE,
            Message::KeepAlive => tag::KEEP_ALIVE,
            Message::ServerShutdown { .. } => tag::SERVER_SHUTDOWN,
            Message::RegisterStatistic { .. } => tag::REGISTER_STATISTIC,
            Message::ReportStatistic { .. } => tag::REPORT_STATISTIC,
            Message::ManagerHello { .. } => tag::MANAGER_HELLO,
            Message::CreateClient { .. } => tag::CREATE_CLIENT,
            Message::CreateClientResponse { .. } => tag::CREATE_CLIENT_RESPONSE,
            Message::DestroyClient { .. } => tag::DESTROY_CLIENT,
            Message::DestroyClientResponse { .. } => tag::DESTROY_CLIENT_RESPONSE,
        }
    }
}

fn write_str(dst: &mut BytesMut, s: &str) {
    ber::write_octet_string(dst, TAG_OCTET_STRING, s.as_bytes());
}

fn write_i64(dst: &mut BytesMut, v: i64) {
    ber::write_integer(dst, TAG_INTEGER, v);
}

fn write_bool(dst: &mut BytesMut, v: bool) {
    ber::write_boolean(dst, TAG_BOOLEAN, v);
}

fn write_f64(dst: &mut BytesMut, v: f64) {
    // No native BER real encoding is used here: samples travel as their
    // ASCII `ryu`-free `to_string()` form inside an OCTET STRING. Simple,
    // exact on round-trip for all finite f64s `f64::to_string`/`parse`
    // agree on, and avoids pulling in a REAL (tag 0x09) implementation for
    // a handful of call sites.
    write_str(dst, &v.to_string());
}

fn write_sequence_of<T>(dst: &mut BytesMut, items: &[T], mut write_one: impl FnMut(&mut BytesMut, &T)) {
    let mut body = BytesMut::new();
    for item in items {
        write_one(&mut body, item);
    }
    ber::write_tlv(dst, TAG_SEQUENCE, &body);
}

fn write_parameter(dst: &mut BytesMut, p: &Parameter) {
    let mut body = BytesMut::new();
    write_str(&mut body, &p.name);
    match &p.value {
        ParamValue::Int(v) => {
            write_i64(&mut body, 0);
            write_i64(&mut body, *v);
        },
        ParamValue::Str(v) => {
            write_i64(&mut body, 1);
            write_str(&mut body, v);
        },
        ParamValue::Bool(v) => {
            write_i64(&mut body, 2);
            write_bool(&mut body, *v);
        },
        ParamValue::Float(v) => {
            write_i64(&mut body, 3);
            write_f64(&mut body, *v);
        },
    }
    ber::write_tlv(dst, TAG_SEQUENCE, &body);
}

fn read_parameter(r: &mut Reader) -> Result<Parameter, BerError> {
    let mut inner = r.child()?;
    let name = inner.read_string(TAG_OCTET_STRING)?;
    let kind = inner.read_i64(TAG_INTEGER)?;
    let value = match kind {
        0 => ParamValue::Int(inner.read_i64(TAG_INTEGER)?),
        1 => ParamValue::Str(inner.read_string(TAG_OCTET_STRING)?),
        2 => ParamValue::Bool(inner.read_bool(TAG_BOOLEAN)?),
        3 => ParamValue::Float(
            inner
                .read_string(TAG_OCTET_STRING)?
                .parse()
                .map_err(|_| BerError::InvalidInteger(0))?,
        ),
        _ => return Err(BerError::InvalidInteger(0)),
    };
    Ok(Parameter { name, value })
}

fn write_tracker(dst: &mut BytesMut, t: &StatTrackerData) {
    let mut body = BytesMut::new();
    write_str(&mut body, &t.display_name);
    write_str(&mut body, &t.thread_id);
    write_i64(&mut body, t.interval_seconds as i64);
    write_sequence_of(&mut body, &t.samples, |b, v| write_f64(b, *v));
    ber::write_tlv(dst, TAG_SEQUENCE, &body);
}

fn read_tracker(r: &mut Reader) -> Result<StatTrackerData, BerError> {
    let mut inner = r.child()?;
    let display_name = inner.read_string(TAG_OCTET_STRING)?;
    let thread_id = inner.read_string(TAG_OCTET_STRING)?;
    let interval_seconds = inner.read_i64(TAG_INTEGER)? as u32;
    let mut samples_seq = inner.child()?;
    let mut samples = Vec::new();
    while !samples_seq.is_empty() {
        samples.push(
            samples_seq
                .read_string(TAG_OCTET_STRING)?
                .parse()
                .map_err(|_| BerError::InvalidInteger(0))?,
        );
    }
    Ok(StatTrackerData {
        display_name,
        thread_id,
        interval_seconds,
        samples,
    })
}

fn write_log_entry(dst: &mut BytesMut, e: &LogEntry) {
    let mut body = BytesMut::new();
    write_i64(&mut body, e.timestamp_ms);
    write_i64(&mut body, e.level.to_i64());
    write_str(&mut body, &e.client_id);
    write_str(&mut body, &e.job_id);
    write_str(&mut body, &e.thread_id);
    write_str(&mut body, &e.message);
    ber::write_tlv(dst, TAG_SEQUENCE, &body);
}

fn read_log_entry(r: &mut Reader) -> Result<LogEntry, BerError> {
    let mut inner = r.child()?;
    Ok(LogEntry {
        timestamp_ms: inner.read_i64(TAG_INTEGER)?,
        level: LogLevel::from_i64(inner.read_i64(TAG_INTEGER)?)?,
        client_id: inner.read_string(TAG_OCTET_STRING)?,
        job_id: inner.read_string(TAG_OCTET_STRING)?,
        thread_id: inner.read_string(TAG_OCTET_STRING)?,
        message: inner.read_string(TAG_OCTET_STRING)?,
    })
}

/// Encodes a full message, including the outer `message_id` and the
/// length-prefixed top-level SEQUENCE, appending to `dst`.
pub fn encode(message_id: u64, msg: &Message, dst: &mut BytesMut) {
    let mut body = BytesMut::new();
    write_i64(&mut body, message_id as i64);

    let mut payload = BytesMut::new();
    encode_payload(msg, &mut payload);
    ber::write_tlv(&mut body, ber::context_constructed(msg.variant_tag()), &payload);

    ber::write_tlv(dst, TAG_SEQUENCE, &body);
}

fn encode_payload(msg: &Message, dst: &mut BytesMut) {
    match msg {
        Message::ClientHello {
            client_id,
            software_version,
            auth_type,
            auth_id,
            auth_credentials,
            restricted_mode,
            supports_time_sync,
        } => {
            write_str(dst, client_id);
            write_str(dst, software_version);
            write_i64(dst, *auth_type);
            write_str(dst, auth_id);
            ber::write_octet_string(dst, TAG_OCTET_STRING, auth_credentials);
            write_bool(dst, *restricted_mode);
            write_bool(dst, *supports_time_sync);
        },
        Message::HelloResponse {
            response_code,
            server_time_ms,
            protocol_minor_version,
            supports_time_sync,
            restricted_mode,
        } => {
            write_i64(dst, response_code.to_i64());
            write_i64(dst, *server_time_ms);
            write_i64(dst, *protocol_minor_version);
            write_bool(dst, *supports_time_sync);
            write_bool(dst, *restricted_mode);
        },
        Message::JobRequest {
            job_id,
            job_class_name,
            threads_per_client,
            client_number,
            scheduled_start_time_ms,
            stop_time_ms,
            duration_secs,
            collection_interval_secs,
            thread_startup_delay_ms,
            parameters,
        } => {
            write_str(dst, job_id);
            write_str(dst, job_class_name);
            write_i64(dst, *threads_per_client as i64);
            write_i64(dst, *client_number as i64);
            write_i64(dst, *scheduled_start_time_ms);
            write_i64(dst, *stop_time_ms);
            write_i64(dst, *duration_secs);
            write_i64(dst, *collection_interval_secs as i64);
            write_i64(dst, *thread_startup_delay_ms as i64);
            write_sequence_of(dst, parameters, write_parameter);
        },
        Message::JobResponse {
            job_id,
            response_code,
        } => {
            write_str(dst, job_id);
            write_i64(dst, response_code.to_i64());
        },
        Message::JobControlRequest { job_id, op } => {
            write_str(dst, job_id);
            write_i64(dst, op.to_i64());
        },
        Message::JobControlResponse {
            job_id,
            response_code,
        } => {
            write_str(dst, job_id);
            write_i64(dst, response_code.to_i64());
        },
        Message::JobCompleted {
            job_id,
            final_state,
            actual_start_time_ms,
            actual_stop_time_ms,
            actual_duration_secs,
            trackers,
            log_messages,
        } => {
            write_str(dst, job_id);
            write_i64(dst, final_state.to_i64());
            write_i64(dst, *actual_start_time_ms);
            write_i64(dst, *actual_stop_time_ms);
            write_i64(dst, *actual_duration_secs);
            write_sequence_of(dst, trackers, write_tracker);
            write_sequence_of(dst, log_messages, write_log_entry);
        },
        Message::StatusRequest { job_id } => {
            write_str(dst, job_id);
        },
        Message::StatusResponse {
            client_state,
            job_id,
            job_state,
            trackers,
            log_messages,
        } => {
            write_i64(dst, client_state.to_i64());
            write_str(dst, job_id);
            write_i64(dst, *job_state);
            write_sequence_of(dst, trackers, write_tracker);
            write_sequence_of(dst, log_messages, write_log_entry);
        },
        Message::ClassTransferRequest { class_name } => {
            write_str(dst, class_name);
        },
        Message::ClassTransferResponse {
            class_name,
            available,
        } => {
            write_str(dst, class_name);
            write_bool(dst, *available);
        },
        Message::KeepAlive => {},
        Message::ServerShutdown { reason } => {
            write_str(dst, reason);
        },
        Message::RegisterStatistic {
            job_id,
            display_name,
            thread_id,
            interval_seconds,
        } => {
            write_str(dst, job_id);
            write_str(dst, display_name);
            write_str(dst, thread_id);
            write_i64(dst, *interval_seconds as i64);
        },
        Message::ReportStatistic {
            job_id,
            display_name,
            thread_id,
            interval_index,
            value,
        } => {
            write_str(dst, job_id);
            write_str(dst, display_name);
            write_str(dst, thread_id);
            write_i64(dst, *interval_index as i64);
            write_f64(dst, *value);
        },
        Message::ManagerHello {
            manager_id,
            max_clients,
            auto_create_clients,
        } => {
            write_str(dst, manager_id);
            write_i64(dst, *max_clients as i64);
            write_i64(dst, *auto_create_clients as i64);
        },
        Message::CreateClient { client_id } => {
            write_str(dst, client_id);
        },
        Message::CreateClientResponse {
            client_id,
            response_code,
        } => {
            write_str(dst, client_id);
            write_i64(dst, response_code.to_i64());
        },
        Message::DestroyClient { client_id } => {
            write_str(dst, client_id);
        },
        Message::DestroyClientResponse {
            client_id,
            response_code,
        } => {
            write_str(dst, client_id);
            write_i64(dst, response_code.to_i64());
        },
    }
}

/// Decodes a complete, fully-buffered top-level element into
/// `(message_id, Message)`.
pub fn decode(buf: &[u8]) -> Result<(u64, Message), BerError> {
    let mut outer = Reader::new(buf);
    let seq_content = outer.expect_tag(TAG_SEQUENCE)?;
    let mut seq = Reader::new(seq_content);
    let message_id = seq.read_i64(TAG_INTEGER)? as u64;

    let offset = 0;
    let (variant_tag, payload) = seq.read_header()?;
    let variant_number = variant_tag & 0x1F;
    let mut r = Reader::new(payload);

    let msg = match variant_number {
        tag::CLIENT_HELLO => Message::ClientHello {
            client_id: r.read_string(TAG_OCTET_STRING)?,
            software_version: r.read_string(TAG_OCTET_STRING)?,
            auth_type: r.read_i64(TAG_INTEGER)?,
            auth_id: r.read_string(TAG_OCTET_STRING)?,
            auth_credentials: r.read_bytes(TAG_OCTET_STRING)?.to_vec(),
            restricted_mode: r.read_bool(TAG_BOOLEAN)?,
            supports_time_sync: r.read_bool(TAG_BOOLEAN)?,
        },
        tag::HELLO_RESPONSE => Message::HelloResponse {
            response_code: ResponseCode::from_i64(r.read_i64(TAG_INTEGER)?)?,
            server_time_ms: r.read_i64(TAG_INTEGER)?,
            protocol_minor_version: r.read_i64(TAG_INTEGER)?,
            supports_time_sync: r.read_bool(TAG_BOOLEAN)?,
            restricted_mode: r.read_bool(TAG_BOOLEAN)?,
        },
        tag::JOB_REQUEST => {
            let job_id = r.read_string(TAG_OCTET_STRING)?;
            let job_class_name = r.read_string(TAG_OCTET_STRING)?;
            let threads_per_client = r.read_i64(TAG_INTEGER)? as u32;
            let client_number = r.read_i64(TAG_INTEGER)? as u32;
            let scheduled_start_time_ms = r.read_i64(TAG_INTEGER)?;
            let stop_time_ms = r.read_i64(TAG_INTEGER)?;
            let duration_secs = r.read_i64(TAG_INTEGER)?;
            let collection_interval_secs = r.read_i64(TAG_INTEGER)? as u32;
            let thread_startup_delay_ms = r.read_i64(TAG_INTEGER)? as u32;
            let mut params_seq = r.child()?;
            let mut parameters = Vec::new();
            while !params_seq.is_empty() {
                parameters.push(read_parameter(&mut params_seq)?);
            }
            Message::JobRequest {
                job_id,
                job_class_name,
                threads_per_client,
                client_number,
                scheduled_start_time_ms,
                stop_time_ms,
                duration_secs,
                collection_interval_secs,
                thread_startup_delay_ms,
                parameters,
            }
        },
        tag::JOB_RESPONSE => Message::JobResponse {
            job_id: r.read_string(TAG_OCTET_STRING)?,
            response_code: ResponseCode::from_i64(r.read_i64(TAG_INTEGER)?)?,
        },
        tag::JOB_CONTROL_REQUEST => Message::JobControlRequest {
            job_id: r.read_string(TAG_OCTET_STRING)?,
            op: JobControlOp::from_i64(r.read_i64(TAG_INTEGER)?)?,
        },
        tag::JOB_CONTROL_RESPONSE => Message::JobControlResponse {
            job_id: r.read_string(TAG_OCTET_STRING)?,
            response_code: ResponseCode::from_i64(r.read_i64(TAG_INTEGER)?)?,
        },
        tag::JOB_COMPLETED => {
            let job_id = r.read_string(TAG_OCTET_STRING)?;
            let final_state = JobState::from_i64(r.read_i64(TAG_INTEGER)?)?;
            let actual_start_time_ms = r.read_i64(TAG_INTEGER)?;
            let actual_stop_time_ms = r.read_i64(TAG_INTEGER)?;
            let actual_duration_secs = r.read_i64(TAG_INTEGER)?;
            let mut trackers_seq = r.child()?;
            let mut trackers = Vec::new();
            while !trackers_seq.is_empty() {
                trackers.push(read_tracker(&mut trackers_seq)?);
            }
            let mut logs_seq = r.child()?;
            let mut log_messages = Vec::new();
            while !logs_seq.is_empty() {
                log_messages.push(read_log_entry(&mut logs_seq)?);
            }
            Message::JobCompleted {
                job_id,
                final_state,
                actual_start_time_ms,
                actual_stop_time_ms,
                actual_duration_secs,
                trackers,
                log_messages,
            }
        },
        tag::STATUS_REQUEST => Message::StatusRequest {
            job_id: r.read_string(TAG_OCTET_STRING)?,
        },
        tag::STATUS_RESPONSE => {
            let client_state = ClientStateValue::from_i64(r.read_i64(TAG_INTEGER)?)?;
            let job_id = r.read_string(TAG_OCTET_STRING)?;
            let job_state = r.read_i64(TAG_INTEGER)?;
            let mut trackers_seq = r.child()?;
            let mut trackers = Vec::new();
            while !trackers_seq.is_empty() {
                trackers.push(read_tracker(&mut trackers_seq)?);
            }
            let mut logs_seq = r.child()?;
            let mut log_messages = Vec::new();
            while !logs_seq.is_empty() {
                log_messages.push(read_log_entry(&mut logs_seq)?);
            }
            Message::StatusResponse {
                client_state,
                job_id,
                job_state,
                trackers,
                log_messages,
            }
        },
        tag::CLASS_TRANSFER_REQUEST => Message::ClassTransferRequest {
            class_name: r.read_string(TAG_OCTET_STRING)?,
        },
        tag::CLASS_TRANSFER_RESPONSE => Message::ClassTransferResponse {
            class_name: r.read_string(TAG_OCTET_STRING)?,
            available: r.read_bool(TAG_BOOLEAN)?,
        },
        tag::KEEP_ALIVE => Message::KeepAlive,
        tag::SERVER_SHUTDOWN => Message::ServerShutdown {
            reason: r.read_string(TAG_OCTET_STRING)?,
        },
        tag::REGISTER_STATISTIC => Message::RegisterStatistic {
            job_id: r.read_string(TAG_OCTET_STRING)?,
            display_name: r.read_string(TAG_OCTET_STRING)?,
            thread_id: r.read_string(TAG_OCTET_STRING)?,
            interval_seconds: r.read_i64(TAG_INTEGER)? as u32,
        },
        tag::REPORT_STATISTIC => Message::ReportStatistic {
            job_id: r.read_string(TAG_OCTET_STRING)?,
            display_name: r.read_string(TAG_OCTET_STRING)?,
            thread_id: r.read_string(TAG_OCTET_STRING)?,
            interval_index: r.read_i64(TAG_INTEGER)? as u32,
            value: r
                .read_string(TAG_OCTET_STRING)?
                .parse()
                .map_err(|_| BerError::InvalidInteger(offset))?,
        },
        tag::MANAGER_HELLO => Message::ManagerHello {
            manager_id: r.read_string(TAG_OCTET_STRING)?,
            max_clients: r.read_i64(TAG_INTEGER)? as u32,
            auto_create_clients: r.read_i64(TAG_INTEGER)? as u32,
        },
        tag::CREATE_CLIENT => Message::CreateClient {
            client_id: r.read_string(TAG_OCTET_STRING)?,
        },
        tag::CREATE_CLIENT_RESPONSE => Message::CreateClientResponse {
            client_id: r.read_string(TAG_OCTET_STRING)?,
            response_code: ResponseCode::from_i64(r.read_i64(TAG_INTEGER)?)?,
        },
        tag::DESTROY_CLIENT => Message::DestroyClient {
            client_id: r.read_string(TAG_OCTET_STRING)?,
        },
        tag::DESTROY_CLIENT_RESPONSE => Message::DestroyClientResponse {
            client_id: r.read_string(TAG_OCTET_STRING)?,
            response_code: ResponseCode::from_i64(r.read_i64(TAG_INTEGER)?)?,
        },
        other => return Err(BerError::UnknownVariant(other)),
    };

    Ok((message_id, msg))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(id: u64, msg: Message) {
        let mut buf = BytesMut::new();
        encode(id, &msg, &mut buf);
        let (decoded_id, decoded) = decode(&buf).unwrap();
        assert_eq!(decoded_id, id);
        assert_eq!(decoded, msg);
    }

    #[test]
    fn keep_alive_round_trip() {
        round_trip(4, Message::KeepAlive);
    }

    #[test]
    fn client_hello_round_trip() {
        round_trip(
            0,
            Message::ClientHello {
                client_id: "worker-1:9000".into(),
                software_version: "2.0".into(),
                auth_type: 0,
                auth_id: "".into(),
                auth_credentials: vec![],
                restricted_mode: false,
                supports_time_sync: true,
            },
        );
    }

    #[test]
    fn job_request_round_trip_with_parameters() {
        round_trip(
            2,
            Message::JobRequest {
                job_id: "j1".into(),
                job_class_name: "Noop".into(),
                threads_per_client: 4,
                client_number: 0,
                scheduled_start_time_ms: 1_000,
                stop_time_ms: ABSENT_I64,
                duration_secs: 2,
                collection_interval_secs: 1,
                thread_startup_delay_ms: 0,
                parameters: vec![
                    Parameter {
                        name: "iterations".into(),
                        value: ParamValue::Int(100),
                    },
                    Parameter {
                        name: "target".into(),
                        value: ParamValue::Str("localhost".into()),
                    },
                    Parameter {
                        name: "verbose".into(),
                        value: ParamValue::Bool(true),
                    },
                    Parameter {
                        name: "ratio".into(),
                        value: ParamValue::Float(0.5),
                    },
                ],
            },
        );
    }

    #[test]
    fn job_completed_round_trip_with_trackers_and_logs() {
        round_trip(
            6,
            Message::JobCompleted {
                job_id: "j1".into(),
                final_state: JobState::Completed,
                actual_start_time_ms: 1_000,
                actual_stop_time_ms: 3_000,
                actual_duration_secs: 2,
                trackers: vec![StatTrackerData {
                    display_name: "Throughput".into(),
                    thread_id: "aggregated".into(),
                    interval_seconds: 1,
                    samples: vec![1.0, 2.5, 3.0],
                }],
                log_messages: vec![LogEntry {
                    timestamp_ms: 1_500,
                    level: LogLevel::Info,
                    client_id: "worker-1".into(),
                    job_id: "j1".into(),
                    thread_id: "0".into(),
                    message: "started".into(),
                }],
            },
        );
    }

    #[test]
    fn message_id_is_preserved_across_variants() {
        for id in [0u64, 2, 4, 1_000_000] {
            round_trip(id, Message::KeepAlive);
        }
    }

    #[test]
    fn manager_hello_round_trip() {
        round_trip(
            0,
            Message::ManagerHello {
                manager_id: "manager-1".into(),
                max_clients: 8,
                auto_create_clients: 2,
            },
        );
    }

    #[test]
    fn create_and_destroy_client_round_trip() {
        round_trip(10, Message::CreateClient { client_id: "client-1".into() });
        round_trip(
            12,
            Message::CreateClientResponse {
                client_id: "client-1".into(),
                response_code: ResponseCode::JobRequestRefused,
            },
        );
        round_trip(14, Message::DestroyClient { client_id: "client-1".into() });
        round_trip(
            16,
            Message::DestroyClientResponse {
                client_id: "client-1".into(),
                response_code: ResponseCode::Success,
            },
        );
    }

    #[test]
    fn unknown_variant_errors() {
        let mut buf = BytesMut::new();
        encode(0, &Message::KeepAlive, &mut buf);
        // Corrupt the variant tag to one that isn't assigned.
        let idx = buf.len() - 2;
        buf[idx] = ber::context_constructed(31);
        assert!(matches!(decode(&buf), Err(BerError::UnknownVariant(_))));
    }
}
