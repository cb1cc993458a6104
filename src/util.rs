use serde::{Deserialize, Deserializer, Serializer};

/// An id as written by older documents, either a JSON number or a string.
#[derive(Deserialize)]
#[serde(untagged)]
enum LenientId {
    Number(u64),
    Text(String),
}

impl LenientId {
    fn into_id(self) -> Option<u64> {
        match self {
            LenientId::Number(id) => Some(id),
            LenientId::Text(text) => match text.trim().parse() {
                Ok(id) => Some(id),
                Err(_) => {
                    log::warn!("Ignoring malformed id '{}'", text);
                    None
                }
            },
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<LenientId>),
    One(LenientId),
}

/// Deserialize a list of ids that may also be stored as a single scalar or `null`.
pub fn deserialize_id_list<'de, D>(d: D) -> Result<Vec<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let ids = match Option::<OneOrMany>::deserialize(d)? {
        None => vec![],
        Some(OneOrMany::One(id)) => id.into_id().into_iter().collect(),
        Some(OneOrMany::Many(ids)) => ids.into_iter().filter_map(LenientId::into_id).collect(),
    };

    let mut unique = Vec::with_capacity(ids.len());
    for id in ids {
        if !unique.contains(&id) {
            unique.push(id);
        }
    }
    Ok(unique)
}

/// Serialize ids as strings, the format moderators have always been stored in.
pub fn serialize_ids_as_strings<S>(ids: &[u64], s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    s.collect_seq(ids.iter().map(|id| id.to_string()))
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Deserialize, Serialize, Debug, PartialEq)]
    struct Holder {
        #[serde(default, deserialize_with = "super::deserialize_id_list")]
        ids: Vec<u64>,
        #[serde(
            default,
            deserialize_with = "super::deserialize_id_list",
            serialize_with = "super::serialize_ids_as_strings"
        )]
        text_ids: Vec<u64>,
    }

    #[test]
    fn test_id_list_shapes() {
        let holder: Holder = serde_json::from_str(r#"{"ids": 42, "text_ids": ["7", 8]}"#).unwrap();
        assert_eq!(holder.ids, vec![42]);
        assert_eq!(holder.text_ids, vec![7, 8]);

        let holder: Holder = serde_json::from_str(r#"{"ids": null}"#).unwrap();
        assert!(holder.ids.is_empty());
        assert!(holder.text_ids.is_empty());

        let holder: Holder = serde_json::from_str(r#"{"ids": [1, "1", "bogus", 2]}"#).unwrap();
        assert_eq!(holder.ids, vec![1, 2]);
    }

    #[test]
    fn test_ids_written_as_strings() {
        let holder = Holder {
            ids: vec![1],
            text_ids: vec![99],
        };
        let json = serde_json::to_string(&holder).unwrap();
        assert_eq!(json, r#"{"ids":[1],"text_ids":["99"]}"#);
    }
}
