//! Tagged message-body variants.
//!
//! A body's untyped `"type"` field could dispatch through a process-wide
//! table of decoders registered by each index plug-in; a closed enum is
//! used instead: known types decode into a concrete variant, anything else
//! falls through to `Unknown` carrying the raw JSON so unrecognised
//! extensions still round-trip losslessly.

use serde_json::Value;

use crate::ref_::Ref;

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Post {
        text: String,
        channel: Option<String>,
        root: Option<Ref>,
        branch: Option<Ref>,
    },
    About {
        about: Ref,
        name: Option<String>,
        description: Option<String>,
        image: Option<Ref>,
    },
    Contact {
        contact: Ref,
        following: Option<bool>,
        blocking: Option<bool>,
    },
    Vote {
        link: Ref,
        value: i32,
        expression: Option<String>,
    },
    Pub {
        address: PubAddress,
    },
    GitRepo {
        name: Option<String>,
    },
    GitUpdate {
        repo: Ref,
    },
    GitIssue {
        repo: Ref,
        title: Option<String>,
    },
    Channel {
        channel: String,
        subscribed: bool,
    },
    Dns {
        name: String,
    },
    Unknown(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PubAddress {
    pub host: String,
    pub port: u16,
    pub key: Ref,
}

impl Body {
    /// Tag string, `None` if the content has no recognisable `"type"` field.
    pub fn type_tag(value: &Value) -> Option<&str> {
        value.get("type").and_then(Value::as_str)
    }

    pub fn decode(value: &Value) -> Option<Body> {
        let tag = Self::type_tag(value)?;
        match tag {
            "post" => Some(Body::Post {
                text: value.get("text")?.as_str()?.to_string(),
                channel: value.get("channel").and_then(Value::as_str).map(str::to_string),
                root: value
                    .get("root")
                    .and_then(Value::as_str)
                    .and_then(|s| Ref::parse(s).ok()),
                branch: value
                    .get("branch")
                    .and_then(Value::as_str)
                    .and_then(|s| Ref::parse(s).ok()),
            }),
            "about" => Some(Body::About {
                about: Ref::parse(value.get("about")?.as_str()?).ok()?,
                name: value.get("name").and_then(Value::as_str).map(str::to_string),
                description: value
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                image: value
                    .get("image")
                    .and_then(Value::as_str)
                    .and_then(|s| Ref::parse(s).ok()),
            }),
            "contact" => Some(Body::Contact {
                contact: Ref::parse(value.get("contact")?.as_str()?).ok()?,
                following: value.get("following").and_then(Value::as_bool),
                blocking: value.get("blocking").and_then(Value::as_bool),
            }),
            "vote" => {
                let vote = value.get("vote")?;
                Some(Body::Vote {
                    link: Ref::parse(vote.get("link")?.as_str()?).ok()?,
                    value: vote.get("value")?.as_i64()? as i32,
                    expression: vote.get("expression").and_then(Value::as_str).map(str::to_string),
                })
            }
            "pub" => {
                let addr = value.get("address")?;
                Some(Body::Pub {
                    address: PubAddress {
                        host: addr.get("host")?.as_str()?.to_string(),
                        port: addr.get("port")?.as_u64()? as u16,
                        key: Ref::parse(addr.get("key")?.as_str()?).ok()?,
                    },
                })
            }
            "git-repo" => Some(Body::GitRepo {
                name: value.get("name").and_then(Value::as_str).map(str::to_string),
            }),
            "git-update" => Some(Body::GitUpdate {
                repo: Ref::parse(value.get("repo")?.as_str()?).ok()?,
            }),
            "git-issue" => Some(Body::GitIssue {
                repo: Ref::parse(value.get("repo")?.as_str()?).ok()?,
                title: value.get("title").and_then(Value::as_str).map(str::to_string),
            }),
            "channel" => Some(Body::Channel {
                channel: value.get("channel")?.as_str()?.to_string(),
                subscribed: value.get("subscribed").and_then(Value::as_bool).unwrap_or(true),
            }),
            "dns" => Some(Body::Dns {
                name: value.get("name")?.as_str()?.to_string(),
            }),
            _ => Some(Body::Unknown(value.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_post() {
        let v = json!({"type": "post", "text": "hi", "channel": "rust"});
        let b = Body::decode(&v).unwrap();
        assert!(matches!(b, Body::Post { ref text, ref channel, .. } if text == "hi" && channel.as_deref() == Some("rust")));
    }

    #[test]
    fn missing_type_is_none() {
        let v = json!({"text": "hi"});
        assert!(Body::decode(&v).is_none());
    }

    #[test]
    fn unrecognised_type_falls_through_to_unknown() {
        let v = json!({"type": "some-future-thing", "x": 1});
        let b = Body::decode(&v).unwrap();
        assert!(matches!(b, Body::Unknown(_)));
    }
}
