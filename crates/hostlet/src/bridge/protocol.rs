//! Wire protocol types for controller-host communication.
//!
//! Inbound frames decode into [`Command`]; everything the host emits is a
//! [`Message`] that encodes into a [`Frame`]. Codes are a single byte and
//! field order is fixed per code.

use std::fmt;
use std::str::FromStr;

use tokio_util::bytes::Bytes;

use super::codec::Frame;
use crate::component::LifecycleState;

/// One-byte command codes shared by both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandCode {
    CreateContext = 1,
    DestroyContext = 2,
    CreateComponent = 3,
    DestroyComponent = 4,
    StartComponent = 5,
    StopComponent = 6,
    InitComponent = 7,
    ShowDocument = 8,
    ShowUrlInFrame = 9,
    ShowStatus = 10,
    ResizeComponent = 11,
    GetUrlData = 12,
    UrlData = 13,
    ShutdownServer = 14,
    ScriptEval = 15,
    GetMember = 16,
    CallMember = 17,
    PutMember = 18,
    DerefObject = 19,
    AudioClipPlay = 20,
    AudioClipLoop = 21,
    AudioClipStop = 22,
    LifecycleNotify = 23,
    ComponentFailed = 24,
    DataCommand = 25,
    PutUrlData = 26,
    PutData = 27,
    PermissionConfirm = 28,
    ShowConsole = 29,
}

impl CommandCode {
    const ALL: [CommandCode; 29] = [
        Self::CreateContext,
        Self::DestroyContext,
        Self::CreateComponent,
        Self::DestroyComponent,
        Self::StartComponent,
        Self::StopComponent,
        Self::InitComponent,
        Self::ShowDocument,
        Self::ShowUrlInFrame,
        Self::ShowStatus,
        Self::ResizeComponent,
        Self::GetUrlData,
        Self::UrlData,
        Self::ShutdownServer,
        Self::ScriptEval,
        Self::GetMember,
        Self::CallMember,
        Self::PutMember,
        Self::DerefObject,
        Self::AudioClipPlay,
        Self::AudioClipLoop,
        Self::AudioClipStop,
        Self::LifecycleNotify,
        Self::ComponentFailed,
        Self::DataCommand,
        Self::PutUrlData,
        Self::PutData,
        Self::PermissionConfirm,
        Self::ShowConsole,
    ];

    pub fn from_u8(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|c| *c as u8 == code)
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Number of delimited fields that precede a raw byte tail, if any.
    pub fn raw_tail_fields(self) -> Option<usize> {
        match self {
            Self::UrlData => Some(2),
            Self::PutData => Some(1),
            _ => None,
        }
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, *self as u8)
    }
}

/// Raw tail lookup by code byte, used by the codec before a frame is typed.
pub fn raw_tail_fields(code: u8) -> Option<usize> {
    CommandCode::from_u8(code).and_then(CommandCode::raw_tail_fields)
}

/// Value type tags carried by member results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum TypeCode {
    Error = -1,
    Void = 0,
    Boolean = 1,
    Function = 2,
    Number = 3,
    Object = 4,
    String = 5,
}

impl TypeCode {
    pub fn as_i8(self) -> i8 {
        self as i8
    }
}

/// Subcodes of `UrlData` deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UrlDataCode {
    Data = 0,
    Finished = 1,
    ErrorCode = 2,
    Headers = 3,
    Redirect = 4,
    MimeType = 5,
    Connect = 6,
    RequestData = 7,
}

impl UrlDataCode {
    pub fn from_u8(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::Data,
            1 => Self::Finished,
            2 => Self::ErrorCode,
            3 => Self::Headers,
            4 => Self::Redirect,
            5 => Self::MimeType,
            6 => Self::Connect,
            7 => Self::RequestData,
            _ => return None,
        })
    }
}

/// Flow-control subcodes sent to the controller with `DataCommand`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DataCommand {
    Stop = 0,
    Hold = 1,
    Resume = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCommand {
    Play,
    Loop,
    Stop,
}

impl AudioCommand {
    fn code(self) -> CommandCode {
        match self {
            Self::Play => CommandCode::AudioClipPlay,
            Self::Loop => CommandCode::AudioClipLoop,
            Self::Stop => CommandCode::AudioClipStop,
        }
    }
}

/// Which member request a result answers; the result reuses its code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberOp {
    Get,
    Call,
    Put,
}

impl MemberOp {
    fn code(self) -> CommandCode {
        match self {
            Self::Get => CommandCode::GetMember,
            Self::Call => CommandCode::CallMember,
            Self::Put => CommandCode::PutMember,
        }
    }
}

/// Typed payload of a member result.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberReply {
    pub type_code: TypeCode,
    pub handle: u64,
    pub value: String,
}

impl MemberReply {
    pub fn new(type_code: TypeCode, handle: u64, value: impl Into<String>) -> Self {
        Self {
            type_code,
            handle,
            value: value.into(),
        }
    }

    pub fn void(handle: u64) -> Self {
        Self::new(TypeCode::Void, handle, "")
    }

    pub fn error(handle: u64, message: impl Into<String>) -> Self {
        Self::new(TypeCode::Error, handle, message)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown command code {0}")]
    UnknownCode(u8),

    #[error("command {0} is not accepted from the controller")]
    UnexpectedDirection(CommandCode),

    #[error("command {code} is missing field {field}")]
    MissingField {
        code: CommandCode,
        field: &'static str,
    },

    #[error("command {code} field {field} is not a valid number: {value:?}")]
    InvalidNumber {
        code: CommandCode,
        field: &'static str,
        value: String,
    },

    #[error("command {code} has unknown subcode {value}")]
    InvalidSubcode { code: CommandCode, value: String },
}

/// Fixed fields of `CreateComponent`, the widest command: ids, name, class,
/// base URL, credentials, codebase, archives, size, title and the parameter
/// count.
pub const CREATE_COMPONENT_FIELDS: usize = 14;

/// `CreateComponent` as it appears on the wire, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentRequest {
    pub context_id: String,
    pub component_id: String,
    pub name: String,
    pub class_name: String,
    pub base_url: String,
    pub user: String,
    pub password: String,
    pub auth_realm: String,
    pub code_base: String,
    pub archives: String,
    pub width: String,
    pub height: String,
    pub title: String,
    pub params: Vec<(String, String)>,
}

/// Commands the controller sends to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    CreateContext {
        context_id: String,
    },
    DestroyContext {
        context_id: String,
    },
    CreateComponent(Box<ComponentRequest>),
    DestroyComponent {
        context_id: String,
        component_id: String,
    },
    StartComponent {
        context_id: String,
        component_id: String,
    },
    StopComponent {
        context_id: String,
        component_id: String,
    },
    InitComponent {
        context_id: String,
        component_id: String,
    },
    UrlData {
        job_id: String,
        subcode: UrlDataCode,
        data: Bytes,
    },
    Shutdown,
    GetMember {
        ticket: u64,
        context_id: String,
        component_id: String,
        handle: u64,
        name: String,
    },
    CallMember {
        ticket: u64,
        context_id: String,
        component_id: String,
        handle: u64,
        name: String,
        args: Vec<String>,
    },
    PutMember {
        ticket: u64,
        context_id: String,
        component_id: String,
        handle: u64,
        name: String,
        value: String,
    },
    DerefObject {
        context_id: String,
        component_id: String,
        handle: u64,
    },
    PermissionConfirm {
        ticket: String,
        decision: String,
    },
    ShowConsole,
}

struct FieldReader {
    code: CommandCode,
    fields: std::vec::IntoIter<Bytes>,
}

impl FieldReader {
    fn new(code: CommandCode, fields: Vec<Bytes>) -> Self {
        Self {
            code,
            fields: fields.into_iter(),
        }
    }

    fn bytes(&mut self, field: &'static str) -> Result<Bytes, ProtocolError> {
        self.fields.next().ok_or(ProtocolError::MissingField {
            code: self.code,
            field,
        })
    }

    fn string(&mut self, field: &'static str) -> Result<String, ProtocolError> {
        let raw = self.bytes(field)?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    fn number<T: FromStr>(&mut self, field: &'static str) -> Result<T, ProtocolError> {
        let value = self.string(field)?;
        value.trim().parse().map_err(|_| ProtocolError::InvalidNumber {
            code: self.code,
            field,
            value,
        })
    }

    fn remaining(self) -> Vec<String> {
        self.fields
            .map(|raw| String::from_utf8_lossy(&raw).into_owned())
            .collect()
    }
}

impl Command {
    /// Type an inbound frame.
    pub fn decode(frame: Frame) -> Result<Self, ProtocolError> {
        let code = CommandCode::from_u8(frame.code).ok_or(ProtocolError::UnknownCode(frame.code))?;
        let mut r = FieldReader::new(code, frame.fields);

        let command = match code {
            CommandCode::CreateContext => Self::CreateContext {
                context_id: r.string("contextId")?,
            },
            CommandCode::DestroyContext => Self::DestroyContext {
                context_id: r.string("contextId")?,
            },
            CommandCode::CreateComponent => Self::CreateComponent(Box::new(decode_component(r)?)),
            CommandCode::DestroyComponent => Self::DestroyComponent {
                context_id: r.string("contextId")?,
                component_id: r.string("componentId")?,
            },
            CommandCode::StartComponent => Self::StartComponent {
                context_id: r.string("contextId")?,
                component_id: r.string("componentId")?,
            },
            CommandCode::StopComponent => Self::StopComponent {
                context_id: r.string("contextId")?,
                component_id: r.string("componentId")?,
            },
            CommandCode::InitComponent => Self::InitComponent {
                context_id: r.string("contextId")?,
                component_id: r.string("componentId")?,
            },
            CommandCode::UrlData => {
                let job_id = r.string("jobId")?;
                let raw = r.string("subcode")?;
                let subcode = raw
                    .trim()
                    .parse::<u8>()
                    .ok()
                    .and_then(UrlDataCode::from_u8)
                    .ok_or(ProtocolError::InvalidSubcode { code, value: raw })?;
                let data = r.fields.next().unwrap_or_default();
                Self::UrlData {
                    job_id,
                    subcode,
                    data,
                }
            }
            CommandCode::ShutdownServer => Self::Shutdown,
            CommandCode::GetMember => Self::GetMember {
                ticket: r.number("ticket")?,
                context_id: r.string("contextId")?,
                component_id: r.string("componentId")?,
                handle: r.number("handle")?,
                name: r.string("name")?,
            },
            CommandCode::CallMember => {
                let ticket = r.number("ticket")?;
                let context_id = r.string("contextId")?;
                let component_id = r.string("componentId")?;
                let handle = r.number("handle")?;
                let name = r.string("name")?;
                Self::CallMember {
                    ticket,
                    context_id,
                    component_id,
                    handle,
                    name,
                    args: r.remaining(),
                }
            }
            CommandCode::PutMember => Self::PutMember {
                ticket: r.number("ticket")?,
                context_id: r.string("contextId")?,
                component_id: r.string("componentId")?,
                handle: r.number("handle")?,
                name: r.string("name")?,
                value: r.string("value")?,
            },
            CommandCode::DerefObject => Self::DerefObject {
                context_id: r.string("contextId")?,
                component_id: r.string("componentId")?,
                handle: r.number("handle")?,
            },
            CommandCode::PermissionConfirm => Self::PermissionConfirm {
                ticket: r.string("ticket")?,
                decision: r.string("decision")?,
            },
            CommandCode::ShowConsole => Self::ShowConsole,
            other => return Err(ProtocolError::UnexpectedDirection(other)),
        };
        Ok(command)
    }

    pub fn code(&self) -> CommandCode {
        match self {
            Self::CreateContext { .. } => CommandCode::CreateContext,
            Self::DestroyContext { .. } => CommandCode::DestroyContext,
            Self::CreateComponent(_) => CommandCode::CreateComponent,
            Self::DestroyComponent { .. } => CommandCode::DestroyComponent,
            Self::StartComponent { .. } => CommandCode::StartComponent,
            Self::StopComponent { .. } => CommandCode::StopComponent,
            Self::InitComponent { .. } => CommandCode::InitComponent,
            Self::UrlData { .. } => CommandCode::UrlData,
            Self::Shutdown => CommandCode::ShutdownServer,
            Self::GetMember { .. } => CommandCode::GetMember,
            Self::CallMember { .. } => CommandCode::CallMember,
            Self::PutMember { .. } => CommandCode::PutMember,
            Self::DerefObject { .. } => CommandCode::DerefObject,
            Self::PermissionConfirm { .. } => CommandCode::PermissionConfirm,
            Self::ShowConsole => CommandCode::ShowConsole,
        }
    }
}

fn decode_component(mut r: FieldReader) -> Result<ComponentRequest, ProtocolError> {
    let mut request = ComponentRequest {
        context_id: r.string("contextId")?,
        component_id: r.string("componentId")?,
        name: r.string("name")?,
        class_name: r.string("className")?,
        base_url: r.string("baseURL")?,
        user: r.string("user")?,
        password: r.string("pass")?,
        auth_realm: r.string("authRealm")?,
        code_base: r.string("codeBase")?,
        archives: r.string("archiveList")?,
        width: r.string("width")?,
        height: r.string("height")?,
        title: r.string("title")?,
        params: Vec::new(),
    };
    let count: usize = r.number("paramCount")?;
    for _ in 0..count {
        let name = r.string("paramName")?;
        let value = r.string("paramValue")?;
        request.params.push((name, value));
    }
    Ok(request)
}

/// Everything the host sends to the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    ShowDocument {
        context_id: String,
        url: String,
    },
    ShowUrlInFrame {
        context_id: String,
        url: String,
        frame: String,
    },
    ShowStatus {
        context_id: String,
        message: String,
    },
    ResizeComponent {
        context_id: String,
        component_id: String,
        width: u32,
        height: u32,
    },
    GetUrlData {
        job_id: String,
        url: String,
    },
    PutUrlData {
        job_id: String,
        url: String,
    },
    PutData {
        job_id: String,
        data: Bytes,
    },
    DataCommand {
        job_id: String,
        command: DataCommand,
    },
    /// `handle` is `None` for a global evaluation.
    ScriptEval {
        context_id: String,
        component_id: String,
        handle: Option<u64>,
        script: String,
    },
    MemberResult {
        op: MemberOp,
        context_id: String,
        ticket: u64,
        reply: MemberReply,
    },
    AudioClip {
        command: AudioCommand,
        context_id: String,
        url: String,
    },
    LifecycleNotify {
        context_id: String,
        component_id: String,
        state: LifecycleState,
    },
    ComponentFailed {
        context_id: String,
        component_id: String,
        message: String,
    },
    PermissionConfirm {
        ticket: String,
        permission: String,
        certificates: Vec<String>,
    },
}

impl Message {
    pub fn code(&self) -> CommandCode {
        match self {
            Self::ShowDocument { .. } => CommandCode::ShowDocument,
            Self::ShowUrlInFrame { .. } => CommandCode::ShowUrlInFrame,
            Self::ShowStatus { .. } => CommandCode::ShowStatus,
            Self::ResizeComponent { .. } => CommandCode::ResizeComponent,
            Self::GetUrlData { .. } => CommandCode::GetUrlData,
            Self::PutUrlData { .. } => CommandCode::PutUrlData,
            Self::PutData { .. } => CommandCode::PutData,
            Self::DataCommand { .. } => CommandCode::DataCommand,
            Self::ScriptEval { .. } => CommandCode::ScriptEval,
            Self::MemberResult { op, .. } => op.code(),
            Self::AudioClip { command, .. } => command.code(),
            Self::LifecycleNotify { .. } => CommandCode::LifecycleNotify,
            Self::ComponentFailed { .. } => CommandCode::ComponentFailed,
            Self::PermissionConfirm { .. } => CommandCode::PermissionConfirm,
        }
    }

    pub fn encode(self) -> Frame {
        let frame = Frame::new(self.code().as_u8());
        match self {
            Self::ShowDocument { context_id, url } => frame.field(context_id).field(text(url)),
            Self::ShowUrlInFrame {
                context_id,
                url,
                frame: target,
            } => frame
                .field(context_id)
                .field(text(url))
                .field(text(target)),
            Self::ShowStatus {
                context_id,
                message,
            } => frame.field(context_id).field(text(message)),
            Self::ResizeComponent {
                context_id,
                component_id,
                width,
                height,
            } => frame
                .field(context_id)
                .field(component_id)
                .display_field(width)
                .display_field(height),
            Self::GetUrlData { job_id, url } | Self::PutUrlData { job_id, url } => {
                frame.field(job_id).field(text(url))
            }
            Self::PutData { job_id, data } => frame.field(job_id).field(data),
            Self::DataCommand { job_id, command } => {
                frame.field(job_id).display_field(command as u8)
            }
            Self::ScriptEval {
                context_id,
                component_id,
                handle,
                script,
            } => frame
                .field(context_id)
                .field(component_id)
                .field(handle.map(|h| h.to_string()).unwrap_or_default())
                .field(text(script)),
            Self::MemberResult {
                context_id,
                ticket,
                reply,
                ..
            } => frame
                .field(context_id)
                .display_field(ticket)
                .display_field(reply.type_code.as_i8())
                .display_field(reply.handle)
                .field(text(reply.value)),
            Self::AudioClip {
                context_id, url, ..
            } => frame.field(context_id).field(text(url)),
            Self::LifecycleNotify {
                context_id,
                component_id,
                state,
            } => frame
                .field(context_id)
                .field(component_id)
                .display_field(state.wire_code()),
            Self::ComponentFailed {
                context_id,
                component_id,
                message,
            } => frame
                .field(context_id)
                .field(component_id)
                .field(text(message)),
            Self::PermissionConfirm {
                ticket,
                permission,
                certificates,
            } => frame
                .field(ticket)
                .field(text(permission))
                .display_field(certificates.len())
                .fields(certificates),
        }
    }
}

/// Guest-supplied text travels in NUL-delimited fields, so any NUL it
/// carries is dropped rather than failing the whole frame.
fn text(value: String) -> String {
    if value.contains('\0') {
        value.replace('\0', "")
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(frame: &Frame) -> String {
        let mut out = format!("{}", frame.code);
        for field in &frame.fields {
            out.push('|');
            out.push_str(&String::from_utf8_lossy(field));
        }
        out
    }

    fn frame(code: CommandCode, fields: &[&str]) -> Frame {
        Frame::new(code.as_u8()).fields(fields.iter().map(|f| f.to_string()))
    }

    #[test]
    fn every_code_maps_back() {
        for code in 1..=29u8 {
            assert_eq!(CommandCode::from_u8(code).map(CommandCode::as_u8), Some(code));
        }
        assert_eq!(CommandCode::from_u8(0), None);
        assert_eq!(CommandCode::from_u8(30), None);
    }

    #[test]
    fn unknown_code_is_reported() {
        let err = Command::decode(Frame::new(99)).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownCode(99)));
    }

    #[test]
    fn outbound_only_code_is_rejected() {
        let err = Command::decode(frame(CommandCode::LifecycleNotify, &["c", "a", "1"])).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::UnexpectedDirection(CommandCode::LifecycleNotify)
        ));
    }

    #[test]
    fn decodes_create_component_with_params() {
        let fields = [
            "c1", "a1", "clock", "demo/Clock.class", "http://h/", "", "", "", "", "a.jar, b.jar",
            "200", "100", "Clock", " 2", "COLOR", "red", "speed", "3",
        ];
        let command = Command::decode(frame(CommandCode::CreateComponent, &fields)).unwrap();
        let Command::CreateComponent(request) = command else {
            panic!("wrong variant");
        };
        assert_eq!(request.context_id, "c1");
        assert_eq!(request.class_name, "demo/Clock.class");
        assert_eq!(
            request.params,
            vec![
                ("COLOR".to_string(), "red".to_string()),
                ("speed".to_string(), "3".to_string())
            ]
        );
    }

    #[test]
    fn create_component_with_short_param_list_fails() {
        let fields = [
            "c1", "a1", "n", "K", "", "", "", "", "", "", "0", "0", "", "2", "only", "one",
        ];
        let err = Command::decode(frame(CommandCode::CreateComponent, &fields)).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField { field: "paramName", .. }));
    }

    #[test]
    fn decodes_call_member_args() {
        let command = Command::decode(frame(
            CommandCode::CallMember,
            &["42", "c1", "a1", "0", "add", "1", "2"],
        ))
        .unwrap();
        assert_eq!(
            command,
            Command::CallMember {
                ticket: 42,
                context_id: "c1".into(),
                component_id: "a1".into(),
                handle: 0,
                name: "add".into(),
                args: vec!["1".into(), "2".into()],
            }
        );
    }

    #[test]
    fn bad_ticket_is_invalid_number() {
        let err = Command::decode(frame(CommandCode::GetMember, &["x", "c1", "a1", "0", "n"]))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidNumber { field: "ticket", .. }));
    }

    #[test]
    fn url_data_keeps_binary_tail() {
        let f = Frame::new(CommandCode::UrlData.as_u8())
            .field("3")
            .field("0")
            .field(Bytes::from_static(b"\0\x01"));
        let command = Command::decode(f).unwrap();
        assert_eq!(
            command,
            Command::UrlData {
                job_id: "3".into(),
                subcode: UrlDataCode::Data,
                data: Bytes::from_static(b"\0\x01"),
            }
        );
    }

    #[test]
    fn url_data_rejects_unknown_subcode() {
        let err = Command::decode(frame(CommandCode::UrlData, &["3", "9"])).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidSubcode { .. }));
    }

    #[test]
    fn member_result_reuses_request_code() {
        let msg = Message::MemberResult {
            op: MemberOp::Call,
            context_id: "c1".into(),
            ticket: 7,
            reply: MemberReply::new(TypeCode::Number, 0, "3"),
        };
        insta::assert_snapshot!(render(&msg.encode()), @"17|c1|7|3|0|3");
    }

    #[test]
    fn error_result_uses_negative_type_code() {
        let msg = Message::MemberResult {
            op: MemberOp::Get,
            context_id: "c1".into(),
            ticket: 8,
            reply: MemberReply::error(5, "handle 5 not found"),
        };
        insta::assert_snapshot!(render(&msg.encode()), @"16|c1|8|-1|5|handle 5 not found");
    }

    #[test]
    fn global_eval_has_empty_handle() {
        let msg = Message::ScriptEval {
            context_id: "c1".into(),
            component_id: "a1".into(),
            handle: None,
            script: "document.title".into(),
        };
        insta::assert_snapshot!(render(&msg.encode()), @"15|c1|a1||document.title");
    }

    #[test]
    fn lifecycle_notify_carries_state_code() {
        let msg = Message::LifecycleNotify {
            context_id: "c1".into(),
            component_id: "a1".into(),
            state: LifecycleState::Started,
        };
        insta::assert_snapshot!(render(&msg.encode()), @"23|c1|a1|4");
    }

    #[test]
    fn permission_confirm_lists_certificates() {
        let msg = Message::PermissionConfirm {
            ticket: "3".into(),
            permission: "connect".into(),
            certificates: vec!["AAA=".into(), "BBB=".into()],
        };
        insta::assert_snapshot!(render(&msg.encode()), @"28|3|connect|2|AAA=|BBB=");
    }

    #[test]
    fn data_command_encodes_subcode() {
        let msg = Message::DataCommand {
            job_id: "4".into(),
            command: DataCommand::Hold,
        };
        insta::assert_snapshot!(render(&msg.encode()), @"25|4|1");
    }

    #[test]
    fn guest_text_drops_embedded_nul() {
        let failed = Message::ComponentFailed {
            context_id: "c1".into(),
            component_id: "a1".into(),
            message: "bad\0hook".into(),
        };
        insta::assert_snapshot!(render(&failed.encode()), @"24|c1|a1|badhook");

        let reply = Message::MemberResult {
            op: MemberOp::Call,
            context_id: "c1".into(),
            ticket: 7,
            reply: MemberReply::error(0, "guest said \0no"),
        };
        insta::assert_snapshot!(render(&reply.encode()), @"17|c1|7|-1|0|guest said no");
    }
}
