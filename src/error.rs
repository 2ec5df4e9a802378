use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Every error the announce/scrape engines can produce.
///
/// Every variant is rendered as a bencoded `failure reason` dict (never an
/// HTTP error status) with a retry interval chosen by [`AnnounceError::retry_interval`].
/// Client/auth mistakes get a long interval so misbehaving clients back off;
/// internal errors get the normal announce interval since they may clear up
/// on the next try.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceError {
    #[error("Malformed request - missing passkey")]
    MissingPasskey,
    #[error("Your passkey is invalid")]
    InvalidPasskey,
    #[error("Your passkey is invalid")]
    PasskeyNotFound,
    #[error("Your account has been disabled")]
    UserDisabled,
    #[error("Could not find a matching user")]
    UserNotFound,
    #[error("Unregistered torrent")]
    TorrentNotFound,
    #[error("Unregistered torrent")]
    TorrentIsDeleted,
    #[error("Torrent has not yet been approved")]
    TorrentNotActive,
    #[error("Invalid request type: client request not understood by the server")]
    InvalidQueryStringKey,
    #[error("Invalid request type: client request not understood by the server")]
    InvalidQueryStringValue,
    #[error("Invalid 'info_hash' (must be 20 bytes long)")]
    InvalidInfoHash,
    #[error("Missing 'info_hash'")]
    MissingInfoHash,
    #[error("Invalid 'peer_id' (must be 20 bytes long)")]
    InvalidPeerId,
    #[error("Missing 'peer_id'")]
    MissingPeerId,
    #[error("Missing 'port'")]
    MissingPort,
    #[error("Invalid 'port'")]
    InvalidPort,
    #[error("Missing 'uploaded'")]
    MissingUploaded,
    #[error("Invalid 'uploaded'")]
    InvalidUploaded,
    #[error("Missing 'downloaded'")]
    MissingDownloaded,
    #[error("Invalid 'downloaded'")]
    InvalidDownloaded,
    #[error("Missing 'left'")]
    MissingLeft,
    #[error("Invalid 'left'")]
    InvalidLeft,
    #[error("Unsupported 'event'")]
    UnsupportedEvent,
    #[error("Invalid 'numwant'")]
    InvalidNumwant,
    #[error("A stopped peer was announced that the tracker has no record of")]
    StoppedPeerDoesntExist,
    #[error("Your download privileges have been revoked")]
    DownloadPrivilegesRevoked,
    #[error("This client is not whitelisted")]
    ClientNotWhitelisted,
    #[error("Client validation failed")]
    ClientValidationFailed,
    #[error("This action is not understood by the tracker")]
    UnknownAction,
    #[error("Invalid ip address")]
    InvalidIp,
    #[error("Internal tracker error")]
    InternalError,
}

impl AnnounceError {
    /// The client/auth errors return a long interval so misbehaving clients
    /// poll less often; internal errors return the ordinary announce
    /// interval since a retry might simply succeed.
    fn retry_interval(&self) -> u32 {
        match self {
            Self::InternalError => 1800,
            _ => 3600,
        }
    }
}

impl IntoResponse for AnnounceError {
    fn into_response(self) -> Response {
        if matches!(self, Self::InternalError) {
            tracing::warn!(error = %self, "internal error while handling request");
        }

        let reason = self.to_string();
        let interval = self.retry_interval();

        let mut body = Vec::with_capacity(64 + reason.len());
        body.extend(b"d14:failure reason");
        body.extend(reason.len().to_string().as_bytes());
        body.extend(b":");
        body.extend(reason.as_bytes());
        body.extend(b"8:intervali");
        body.extend(interval.to_string().as_bytes());
        body.extend(b"e12:min intervali");
        body.extend(interval.to_string().as_bytes());
        body.extend(b"ee");

        (StatusCode::OK, body).into_response()
    }
}
