/// Connection state of a live session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// Nothing was started yet.
    #[default]
    Idle,
    /// A transport handshake is in flight.
    Connecting,
    /// The transport is open and audio flows both ways.
    Open,
    /// The transport dropped and a new attempt is scheduled.
    Reconnecting,
    /// The session is over, either on purpose or after giving up.
    Closed,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The user ended the session.
    Manual,
    /// The credit balance reached zero; the frontend should offer a top-up
    /// rather than a regular summary.
    CreditExhausted,
}

/// Short, classified errors shown to the user.
///
/// Messages are in pt-BR, the product's locale. Raw causes are logged by the
/// engine and never reach the frontend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The transport dropped and a reconnect is in progress.
    #[error("Instabilidade. Reconectando...")]
    Reconnecting,
    /// Reconnection attempts were exhausted.
    #[error("Conexão perdida. Verifique sua internet e tente novamente.")]
    ConnectionLost,
    /// The conversation service refused the session.
    #[error("Falha na conexão.")]
    ConnectionFailed,
    /// No API key is configured for the conversation service.
    #[error("Chave de API ausente.")]
    MissingApiKey,
    /// The operating system refused access to the microphone.
    #[error("Permissão do microfone negada.")]
    PermissionDenied,
    /// No usable microphone or speaker was found.
    #[error("Câmera ou microfone não detectados.")]
    DeviceUnavailable,
    /// The audio hardware failed for another reason.
    #[error("Não foi possível iniciar o áudio.")]
    AudioFailure,
    /// The user has no credit left.
    #[error("Seus créditos acabaram. Adicione créditos para começar!")]
    NoCredits,
    /// A session is already running.
    #[error("Já existe uma sessão em andamento.")]
    SessionActive,
    /// The command needs a running session.
    #[error("Nenhuma sessão em andamento.")]
    NoActiveSession,
    /// The requested conversation partner does not exist.
    #[error("Avatar desconhecido.")]
    UnknownPersona,
}

/// Observable state of a live session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStatus {
    pub connection: ConnectionState,
    /// Whether the agent is currently speaking, including the short grace
    /// period after its last fragment.
    pub speaking: bool,
    pub reconnecting: bool,
    /// Set once the session started tearing down.
    pub finishing: bool,
    pub last_error: Option<SessionError>,
    pub remaining_seconds: u32,
}

impl SessionStatus {
    pub fn is_connected(&self) -> bool {
        self.connection == ConnectionState::Open
    }
}
