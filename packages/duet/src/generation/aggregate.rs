//! Stream aggregation over the chunk shapes a backend may emit.

use futures::{Stream, TryStreamExt};
use serde::Deserialize;

use super::GenerationError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Part {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
}

/// One piece of a generation response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextChunk {
    Direct(String),
    Parts(Vec<Part>),
    Candidates(Vec<Candidate>),
}

impl TextChunk {
    /// Append every text fragment this chunk carries, in order.
    pub fn write_text(&self, out: &mut String) {
        match self {
            Self::Direct(text) => out.push_str(text),
            Self::Parts(parts) => push_parts(parts, out),
            Self::Candidates(candidates) => {
                for content in candidates.iter().filter_map(|c| c.content.as_ref()) {
                    push_parts(&content.parts, out);
                }
            }
        }
    }

    pub fn text(&self) -> String {
        let mut out = String::new();
        self.write_text(&mut out);
        out
    }

    /// Decode one JSON chunk as sent by the streaming API.
    pub fn from_json(raw: &str) -> Result<TextChunk, GenerationError> {
        let chunk: RawChunk = serde_json::from_str(raw)?;
        if let Some(err) = chunk.error {
            return Err(GenerationError::Api(err.message.unwrap_or_else(|| {
                err.status.unwrap_or_else(|| "unknown error".to_string())
            })));
        }
        Ok(chunk.into())
    }
}

fn push_parts(parts: &[Part], out: &mut String) {
    for text in parts.iter().filter_map(|p| p.text.as_deref()) {
        out.push_str(text);
    }
}

#[derive(Debug, Deserialize)]
struct RawChunk {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    parts: Option<Vec<Part>>,
    #[serde(default)]
    candidates: Option<Vec<Candidate>>,
    #[serde(default)]
    error: Option<RawError>,
}

#[derive(Debug, Deserialize)]
struct RawError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

impl From<RawChunk> for TextChunk {
    fn from(raw: RawChunk) -> Self {
        match (raw.text, raw.parts, raw.candidates) {
            (Some(text), _, _) if !text.is_empty() => TextChunk::Direct(text),
            (_, Some(parts), _) => TextChunk::Parts(parts),
            (_, _, Some(candidates)) => TextChunk::Candidates(candidates),
            // Nothing recognizable: contributes no text.
            _ => TextChunk::Parts(Vec::new()),
        }
    }
}

/// Concatenate the text of every chunk in arrival order and trim the result.
pub async fn aggregate<S>(stream: S) -> Result<String, GenerationError>
where
    S: Stream<Item = Result<TextChunk, GenerationError>>,
{
    let full = stream
        .try_fold(String::new(), |mut out, chunk| async move {
            chunk.write_text(&mut out);
            Ok(out)
        })
        .await?;
    Ok(full.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn part(text: &str) -> Part {
        Part {
            text: Some(text.to_string()),
        }
    }

    #[tokio::test]
    async fn concatenates_all_shapes_in_order() {
        let chunks = vec![
            Ok(TextChunk::Direct("  <A>Hi".to_string())),
            Ok(TextChunk::Parts(vec![part("!</A>"), Part { text: None }])),
            Ok(TextChunk::Candidates(vec![
                Candidate {
                    content: Some(Content {
                        parts: vec![part("<B>Yo"), part("</B>")],
                    }),
                },
                Candidate { content: None },
            ])),
            Ok(TextChunk::Parts(Vec::new())),
        ];
        let out = aggregate(stream::iter(chunks)).await.unwrap();
        assert_eq!(out, "<A>Hi!</A><B>Yo</B>");
    }

    #[tokio::test]
    async fn empty_stream_is_empty_string() {
        let out = aggregate(stream::iter(Vec::<Result<TextChunk, GenerationError>>::new()))
            .await
            .unwrap();
        assert_eq!(out, "");
    }

    #[tokio::test]
    async fn error_chunk_fails_aggregation() {
        let chunks = vec![
            Ok(TextChunk::Direct("partial".to_string())),
            Err(GenerationError::Api("quota".to_string())),
        ];
        let err = aggregate(stream::iter(chunks)).await.unwrap_err();
        assert!(matches!(err, GenerationError::Api(msg) if msg == "quota"));
    }

    #[test]
    fn decodes_gemini_candidates() {
        let chunk = TextChunk::from_json(
            r#"{"candidates":[{"content":{"parts":[{"text":"<A>"},{"text":"hey</A>"}],"role":"model"}}],"usageMetadata":{}}"#,
        )
        .unwrap();
        assert!(matches!(chunk, TextChunk::Candidates(_)));
        assert_eq!(chunk.text(), "<A>hey</A>");
    }

    #[test]
    fn direct_text_wins_over_other_shapes() {
        let chunk = TextChunk::from_json(r#"{"text":"direct","parts":[{"text":"ignored"}]}"#).unwrap();
        assert_eq!(chunk, TextChunk::Direct("direct".to_string()));
    }

    #[test]
    fn unrecognized_chunk_contributes_nothing() {
        let chunk = TextChunk::from_json(r#"{"usageMetadata":{"totalTokenCount":3}}"#).unwrap();
        assert_eq!(chunk.text(), "");
    }

    #[test]
    fn error_payload_is_api_error() {
        let err =
            TextChunk::from_json(r#"{"error":{"code":429,"message":"Resource exhausted"}}"#).unwrap_err();
        assert!(matches!(err, GenerationError::Api(msg) if msg == "Resource exhausted"));
    }
}
