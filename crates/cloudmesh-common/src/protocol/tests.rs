//! Round-trip tests for the message catalog.
//!
//! Every variant must survive encode/decode with all fields intact,
//! including messages embedded in `CloudWagon` and `ServiceDefinition`.

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::transport::Codec;
    use serde_json::json;
    use std::collections::HashSet;

    fn round_trip(message: &Message) -> Message {
        let codec = Codec::new();
        codec.decode(&codec.encode(message).unwrap()).unwrap()
    }

    fn node(id: &str) -> NodeDescriptor {
        NodeDescriptor::new(id, format!("node-{}", id)).with_address("127.0.0.1:7400")
    }

    fn catalog() -> Vec<MessageBody> {
        vec![
            MessageBody::Ack,
            MessageBody::NodeIdentification(node("a")),
            MessageBody::KeepAlive,
            MessageBody::Shutdown,
            MessageBody::BusyNode(node("b")),
            MessageBody::PublishPath(PublishPath {
                path: vec!["services".into(), "billing".into()],
            }),
            MessageBody::PublishObject(PublishObject {
                objects: vec![
                    PathValue {
                        path: vec!["config".into(), "threads".into()],
                        value: json!(8),
                    },
                    PathValue {
                        path: vec!["config".into(), "name".into()],
                        value: json!({"nested": [1, 2.5, "three", null, true]}),
                    },
                ],
                published_at: 1_700_000_000_123,
                destinations: vec!["a".into(), "c".into()],
            }),
            MessageBody::HidePath(PathRef::new(["config"])),
            MessageBody::RemoveObject(PathRef::new(["config", "threads"])),
            MessageBody::Get(PathRef::new(["config", "threads"])),
            MessageBody::Response(GetResponse::found(json!("value"))),
            MessageBody::Response(GetResponse::not_found()),
            MessageBody::Response(GetResponse::found(Value::Null)),
            MessageBody::Lock(LockRequest {
                path: vec!["jobs".into(), "nightly".into()],
                timeout_nanos: 5_000_000_000,
            }),
            MessageBody::Unlock(LockRequest {
                path: vec!["jobs".into(), "nightly".into()],
                timeout_nanos: 0,
            }),
            MessageBody::Signal(SignalRequest {
                lock_name: "queue".into(),
                condition_name: "not_empty".into(),
            }),
            MessageBody::SignalAll(SignalRequest {
                lock_name: "queue".into(),
                condition_name: "not_full".into(),
            }),
            MessageBody::PublishLayer(PublishLayer {
                path: "billing.Invoices".into(),
                node_id: "a".into(),
                service_id: "svc-1".into(),
            }),
            MessageBody::LayerInvoke(LayerInvoke {
                path: "billing.Invoices".into(),
                method: "total".into(),
                parameter_types: vec!["string".into(), "int".into()],
                caller_session: Some("session-1".into()),
                arguments: vec![json!("acme"), json!(2024)],
            }),
            MessageBody::MethodInvoke(MethodInvoke {
                method: "echo".into(),
                parameter_types: vec!["string".into()],
                arguments: vec![json!("hi")],
            }),
            MessageBody::MethodResponse(MethodResponse::success(json!({"total": 42}))),
            MessageBody::MethodResponse(MethodResponse::success(Value::Null)),
            MessageBody::MethodResponse(MethodResponse::failure(RemoteFailure::new(
                "IllegalState",
                "ledger closed",
            ))),
            MessageBody::Invoke(PathRef::new(["hooks", "reload"])),
            MessageBody::Encrypted(Encrypted {
                payload: vec![0, 1, 2, 254, 255],
            }),
        ]
    }

    #[test]
    fn test_every_variant_round_trips() {
        for body in catalog() {
            let message = Message::new(body).with_session("caller");
            assert_eq!(round_trip(&message), message, "{}", message.type_name());
        }
    }

    #[test]
    fn test_type_names_are_distinct() {
        let names: HashSet<_> = catalog().iter().map(|b| b.type_name()).collect();
        // Response and MethodResponse appear three times in the catalog.
        assert_eq!(names.len(), catalog().len() - 4);
    }

    #[test]
    fn test_type_field_matches_type_name() {
        for body in catalog() {
            let message = Message::new(body);
            let value = serde_json::to_value(&message).unwrap();
            assert_eq!(value[TYPE_FIELD], message.type_name());
        }
    }

    #[test]
    fn test_cloud_wagon_keeps_inner_ids() {
        let first = Message::new(MessageBody::KeepAlive);
        let second = Message::new(MessageBody::Get(PathRef::new(["a"])));
        let third = Message::new(MessageBody::Shutdown);

        let mut wagon = CloudWagon::new();
        wagon.load("node-a", first.clone());
        wagon.load("node-a", second.clone());
        wagon.load("node-b", third.clone());

        let message = Message::new(MessageBody::CloudWagon(wagon));
        let decoded = round_trip(&message);
        assert_eq!(decoded, message);

        let MessageBody::CloudWagon(wagon) = decoded.body else {
            panic!("expected a wagon");
        };
        assert_eq!(wagon.destinations, vec!["node-a".to_string(), "node-b".to_string()]);
        assert_eq!(wagon.messages["node-a"], vec![first, second]);
        assert_eq!(wagon.messages["node-b"][0].id, third.id);
        assert_eq!(wagon.messages["node-b"][0].timestamp, third.timestamp);
    }

    #[test]
    fn test_service_definition_embeds_messages() {
        let publish = Message::new(MessageBody::PublishLayer(PublishLayer {
            path: "math.Adder".into(),
            node_id: "n1".into(),
            service_id: "svc".into(),
        }));
        let definition = ServiceDefinition {
            service_id: "svc".into(),
            service_name: "cloudmesh".into(),
            broadcasting: true,
            event_listener: false,
            messages: vec![publish.clone()],
        };

        for body in [
            MessageBody::ServiceDefinition(definition.clone()),
            MessageBody::ServiceDefinitionResponse(definition),
        ] {
            let message = Message::new(body);
            let decoded = round_trip(&message);
            assert_eq!(decoded, message);
        }
    }

    #[test]
    fn test_nested_wagon_in_wagon() {
        let mut inner = CloudWagon::new();
        inner.load("x", Message::new(MessageBody::Ack));
        let mut outer = CloudWagon::new();
        outer.load("y", Message::new(MessageBody::CloudWagon(inner)));

        let message = Message::new(MessageBody::CloudWagon(outer));
        assert_eq!(round_trip(&message), message);
    }

    #[test]
    fn test_reply_reuses_id() {
        let request = Message::new(MessageBody::Get(PathRef::new(["k"])));
        let reply = Message::reply(request.id, MessageBody::Response(GetResponse::not_found()));
        assert_eq!(reply.id, request.id);
        assert!(reply.body.is_reply());
        assert!(!request.body.is_reply());
    }

    #[test]
    fn test_message_ids_are_unique() {
        let ids: HashSet<_> = (0..1000)
            .map(|_| Message::new(MessageBody::KeepAlive).id)
            .collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_session_id_is_optional_on_wire() {
        let message = Message::new(MessageBody::KeepAlive);
        let value = serde_json::to_value(&message).unwrap();
        assert!(value.get("session_id").is_none());
        assert_eq!(round_trip(&message).session_id, None);
    }

    #[test]
    fn test_method_response_into_result() {
        assert_eq!(
            MethodResponse::success(json!(3)).into_result(),
            Ok(json!(3))
        );
        let failure = RemoteFailure::new("Boom", "it broke");
        assert_eq!(
            MethodResponse::failure(failure.clone()).into_result(),
            Err(failure)
        );
    }
}
