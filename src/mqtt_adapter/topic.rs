//! MQTT topic layout: `lprserver/cameras/{camera_id}/{channel}`

use rumqttc::QoS;

use crate::envelope::DataType;

/// Parsed camera topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTopic {
    pub camera_id: String,
    pub channel: DataType,
}

/// Topic parse failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopicError {
    #[error("invalid topic format '{0}': expected 'lprserver/cameras/{{camera_id}}/{{channel}}'")]
    InvalidFormat(String),
    #[error("unknown channel '{0}'")]
    UnknownChannel(String),
    #[error("camera_id cannot be empty in topic")]
    EmptyCameraId,
}

/// Parse an MQTT topic in the format
/// `lprserver/cameras/{camera_id}/{channel}`.
pub fn parse_topic(topic: &str) -> Result<ParsedTopic, TopicError> {
    let parts: Vec<&str> = topic.split('/').collect();

    if parts.len() != 4 || parts[0] != "lprserver" || parts[1] != "cameras" {
        return Err(TopicError::InvalidFormat(topic.to_string()));
    }

    let camera_id = parts[2].trim();
    if camera_id.is_empty() {
        return Err(TopicError::EmptyCameraId);
    }

    let channel = match parts[3] {
        "detection" => DataType::Detection,
        "health" => DataType::Health,
        "config" => DataType::Config,
        "control" => DataType::Control,
        other => return Err(TopicError::UnknownChannel(other.to_string())),
    };

    Ok(ParsedTopic {
        camera_id: camera_id.to_string(),
        channel,
    })
}

/// Delivery guarantee per channel. Transport policy, not business
/// policy: detections lean on the dedup ledger for at-least-once,
/// a missed health tick is superseded by the next one, config/control
/// are exactly-once and retained.
pub fn qos_for_channel(channel: DataType) -> QoS {
    match channel {
        DataType::Detection => QoS::AtLeastOnce,
        DataType::Health => QoS::AtMostOnce,
        DataType::Config | DataType::Control => QoS::ExactlyOnce,
        // Registration rides the WebSocket channel; if it ever appears
        // over MQTT it gets the at-least-once default.
        DataType::Registration => QoS::AtLeastOnce,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_topic() {
        let parsed = parse_topic("lprserver/cameras/CAM1/detection").unwrap();
        assert_eq!(parsed.camera_id, "CAM1");
        assert_eq!(parsed.channel, DataType::Detection);
    }

    #[test]
    fn test_parse_all_channels() {
        for (suffix, expected) in [
            ("detection", DataType::Detection),
            ("health", DataType::Health),
            ("config", DataType::Config),
            ("control", DataType::Control),
        ] {
            let topic = format!("lprserver/cameras/CAM1/{}", suffix);
            assert_eq!(parse_topic(&topic).unwrap().channel, expected);
        }
    }

    #[test]
    fn test_parse_wrong_prefix() {
        assert!(matches!(
            parse_topic("other/cameras/CAM1/detection"),
            Err(TopicError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_parse_missing_segment() {
        assert!(matches!(
            parse_topic("lprserver/cameras/CAM1"),
            Err(TopicError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_parse_unknown_channel() {
        assert_eq!(
            parse_topic("lprserver/cameras/CAM1/telemetry"),
            Err(TopicError::UnknownChannel("telemetry".to_string()))
        );
    }

    #[test]
    fn test_parse_empty_camera_id() {
        assert_eq!(
            parse_topic("lprserver/cameras//detection"),
            Err(TopicError::EmptyCameraId)
        );
    }

    #[test]
    fn test_qos_mapping() {
        assert_eq!(qos_for_channel(DataType::Detection), QoS::AtLeastOnce);
        assert_eq!(qos_for_channel(DataType::Health), QoS::AtMostOnce);
        assert_eq!(qos_for_channel(DataType::Config), QoS::ExactlyOnce);
        assert_eq!(qos_for_channel(DataType::Control), QoS::ExactlyOnce);
    }
}
