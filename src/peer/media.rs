use crate::error::{NegotiationError, Result};
use crate::utils::random_id;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Какие локальные устройства запрашиваются
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// Локальный поток: набор треков, которые транспорт отправит собеседнику
#[derive(Clone)]
pub struct MediaStream {
    pub id: String,
    pub tracks: Vec<Arc<TrackLocalStaticSample>>,
}

impl std::fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.id)
            .field(
                "tracks",
                &self.tracks.iter().map(|t| t.id().to_string()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[async_trait]
pub trait MediaCapability: Send + Sync {
    /// `MediaUnavailable`, если доступ запрещён или устройств нет
    async fn acquire_local_media(&self, constraints: MediaConstraints) -> Result<MediaStream>;
}

/// Источник на основе sample-треков Opus/VP8; кадры пишет вызывающий код
#[derive(Debug, Default, Clone)]
pub struct TrackMedia;

#[async_trait]
impl MediaCapability for TrackMedia {
    async fn acquire_local_media(&self, constraints: MediaConstraints) -> Result<MediaStream> {
        if !constraints.audio && !constraints.video {
            return Err(NegotiationError::MediaUnavailable(
                "no audio or video requested".into(),
            ));
        }
        let stream_id = format!("stream-{}", random_id());
        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(sample_track(MIME_TYPE_OPUS, "audio", &stream_id));
        }
        if constraints.video {
            tracks.push(sample_track(MIME_TYPE_VP8, "video", &stream_id));
        }
        debug!(stream = %stream_id, tracks = tracks.len(), "local media acquired");
        Ok(MediaStream {
            id: stream_id,
            tracks,
        })
    }
}

fn sample_track(mime_type: &str, id: &str, stream_id: &str) -> Arc<TrackLocalStaticSample> {
    Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: mime_type.to_owned(),
            ..Default::default()
        },
        id.to_owned(),
        stream_id.to_owned(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builds_requested_tracks() {
        let stream = TrackMedia
            .acquire_local_media(MediaConstraints {
                audio: true,
                video: false,
            })
            .await
            .unwrap();
        assert_eq!(stream.tracks.len(), 1);
        assert_eq!(stream.tracks[0].id(), "audio");
        assert_eq!(stream.tracks[0].codec().mime_type, MIME_TYPE_OPUS);
    }

    #[tokio::test]
    async fn nothing_requested_is_unavailable() {
        let err = TrackMedia
            .acquire_local_media(MediaConstraints {
                audio: false,
                video: false,
            })
            .await
            .unwrap_err();
        assert_eq!(err.reason_code(), "media_unavailable");
    }
}
