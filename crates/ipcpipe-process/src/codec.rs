//! JSON values over framed pipes.

use ipcpipe_frame::{PipeReader, PipeWriter};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Serialize `value` as JSON and send it as one message.
pub async fn put_value<T: Serialize + ?Sized>(writer: &PipeWriter, value: &T) -> Result<()> {
    let payload = serde_json::to_vec(value)?;
    writer.put(&payload).await?;
    Ok(())
}

/// Receive one message and deserialize it from JSON.
pub async fn get_value<T: DeserializeOwned>(reader: &PipeReader) -> Result<T> {
    let payload = reader.get().await?;
    Ok(serde_json::from_slice(&payload)?)
}

#[cfg(all(test, unix))]
mod tests {
    use serde::Deserialize;

    use super::*;
    use crate::ProcessError;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Job {
        id: u32,
        args: Vec<String>,
    }

    #[tokio::test(flavor = "current_thread")]
    async fn values_round_trip_through_a_pipe() {
        let (reader, writer) = ipcpipe_frame::pipe().unwrap();
        let job = Job {
            id: 7,
            args: vec!["--fast".into()],
        };

        put_value(&writer, &job).await.unwrap();
        let got: Job = get_value(&reader).await.unwrap();
        assert_eq!(got, job);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn malformed_payload_is_a_json_error() {
        let (reader, writer) = ipcpipe_frame::pipe().unwrap();
        writer.put(b"{not json").await.unwrap();

        let err = get_value::<Job>(&reader).await.unwrap_err();
        assert!(matches!(err, ProcessError::Json(_)));
    }
}
