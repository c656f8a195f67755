fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    use fluff_dlc::{
        DlcManager, NotificationRouter, SlotState, TransferConfig, Transport, TransportError,
        UploadRequest,
    };
    use fluff_protocol::commands::{self, MoodAction};
    use fluff_protocol::constants::MoodMeterType;
    use fluff_protocol::notification::parse;
    use fluff_protocol::{Endpoint, FileTransferMode, Notification, SlotOp};
    use serde::Deserialize;
    use tokio_util::sync::CancellationToken;

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads and deserializes a fixture file.
    fn load_fixture<T: serde::de::DeserializeOwned>(name: &str) -> T {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    fn bytes(hex_str: &str) -> Vec<u8> {
        hex::decode(hex_str).unwrap_or_else(|e| panic!("bad hex {hex_str:?}: {e}"))
    }

    #[derive(Debug, Deserialize)]
    struct Frame {
        endpoint: Endpoint,
        hex: String,
    }

    // --- Outbound commands ---

    #[derive(Debug, Deserialize)]
    struct CommandCase {
        name: String,
        args: Vec<u32>,
        #[serde(default)]
        filename: Option<String>,
        hex: String,
    }

    #[derive(Debug, Deserialize)]
    struct CommandFixture {
        commands: Vec<CommandCase>,
    }

    fn build(case: &CommandCase) -> Vec<u8> {
        let a = |i: usize| case.args[i] as u8;
        match case.name.as_str() {
            "antenna_color" => commands::antenna_color(a(0), a(1), a(2)),
            "trigger_action" => commands::trigger_action(a(0), a(1), a(2), a(3)),
            "lcd_backlight" => commands::lcd_backlight(a(0) != 0),
            "debug_menu" => commands::debug_menu(),
            "set_name" => commands::set_name(a(0)).unwrap(),
            "set_mood_meter" => {
                let action = if a(0) == 1 {
                    MoodAction::Set
                } else {
                    MoodAction::Increase
                };
                let mood = match a(1) {
                    0 => MoodMeterType::Excitedness,
                    1 => MoodMeterType::Displeasedness,
                    2 => MoodMeterType::Tiredness,
                    3 => MoodMeterType::Fullness,
                    _ => MoodMeterType::Wellness,
                };
                commands::set_mood_meter(action, mood, a(2))
            }
            "nordic_packet_ack" => commands::nordic_packet_ack(a(0) != 0),
            "load" => commands::slot_command(SlotOp::Load, a(0)),
            "activate" => commands::slot_command(SlotOp::Activate, a(0)),
            "deactivate" => commands::slot_command(SlotOp::Deactivate, a(0)),
            "delete" => commands::slot_command(SlotOp::Delete, a(0)),
            "slot_status_query" => commands::slot_status_query(),
            "announce_dlc" => {
                let filename = case.filename.as_deref().unwrap_or_default();
                commands::announce_dlc(case.args[0], a(1), filename).unwrap()
            }
            other => panic!("fixture names unknown command {other:?}"),
        }
    }

    #[test]
    fn fixture_commands() {
        let fixture: CommandFixture = load_fixture("commands.json");
        assert!(!fixture.commands.is_empty());
        for case in &fixture.commands {
            assert_eq!(
                hex::encode(build(case)),
                case.hex,
                "encoding mismatch for {} {:?}",
                case.name,
                case.args
            );
        }
    }

    // --- Inbound notifications ---

    #[derive(Debug, Deserialize)]
    struct NotificationCase {
        endpoint: Endpoint,
        hex: String,
        kind: String,
        #[serde(default)]
        value: Option<String>,
        #[serde(default)]
        slot: Option<u8>,
        #[serde(default)]
        success: Option<bool>,
        #[serde(default)]
        codes: Option<Vec<u8>>,
    }

    #[derive(Debug, Deserialize)]
    struct NotificationFixture {
        notifications: Vec<NotificationCase>,
    }

    fn from_name<T: serde::de::DeserializeOwned>(name: &str) -> T {
        serde_json::from_value(serde_json::Value::String(name.to_string()))
            .unwrap_or_else(|e| panic!("unknown name {name:?}: {e}"))
    }

    #[test]
    fn fixture_notifications() {
        let fixture: NotificationFixture = load_fixture("notifications.json");
        for case in &fixture.notifications {
            let raw = bytes(&case.hex);
            let parsed = parse(case.endpoint, &raw);
            let ctx = format!("{:?} {}", case.endpoint, case.hex);

            match case.kind.as_str() {
                "error" => assert!(parsed.is_err(), "{ctx}: expected error, got {parsed:?}"),
                "transfer_status" => {
                    let mode: FileTransferMode = from_name(case.value.as_deref().unwrap());
                    assert_eq!(parsed.unwrap(), Notification::TransferStatus(mode), "{ctx}");
                }
                "slot_ack" => {
                    let op: SlotOp = from_name(case.value.as_deref().unwrap());
                    assert_eq!(
                        parsed.unwrap(),
                        Notification::SlotAck {
                            op,
                            slot: case.slot.unwrap(),
                            success: case.success.unwrap(),
                        },
                        "{ctx}"
                    );
                }
                "slot_status" => {
                    assert_eq!(
                        parsed.unwrap(),
                        Notification::SlotStatus(case.codes.clone().unwrap()),
                        "{ctx}"
                    );
                }
                "packet_ack" => {
                    assert!(matches!(parsed, Ok(Notification::PacketAck(_))), "{ctx}");
                }
                "other" => {
                    assert!(matches!(parsed, Ok(Notification::Other { .. })), "{ctx}");
                }
                other => panic!("fixture names unknown kind {other:?}"),
            }
        }
    }

    // --- Recorded conversation ---

    #[derive(Debug, Deserialize)]
    struct Step {
        write: Frame,
        replies: Vec<Frame>,
    }

    #[derive(Debug, Deserialize)]
    struct Transcript {
        slot: u8,
        filename: String,
        payload_len: usize,
        steps: Vec<Step>,
    }

    /// Plays the device side of a recorded conversation.
    struct ReplayDevice {
        router: Arc<NotificationRouter>,
        steps: Mutex<VecDeque<Step>>,
        mismatches: Mutex<Vec<String>>,
    }

    impl Transport for ReplayDevice {
        async fn write(&self, endpoint: Endpoint, data: &[u8]) -> Result<(), TransportError> {
            let step = self.steps.lock().unwrap().pop_front();
            let Some(step) = step else {
                self.mismatches
                    .lock()
                    .unwrap()
                    .push(format!("unexpected extra write {endpoint:?} {}", hex::encode(data)));
                return Ok(());
            };

            let actual = hex::encode(data);
            if step.write.endpoint != endpoint || step.write.hex != actual {
                self.mismatches.lock().unwrap().push(format!(
                    "expected {:?} {}, got {endpoint:?} {actual}",
                    step.write.endpoint, step.write.hex
                ));
            }
            for reply in &step.replies {
                self.router.on_notification(reply.endpoint, &bytes(&reply.hex));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn fixture_flash_transcript() {
        let transcript: Transcript = load_fixture("flash_transcript.json");
        let total_steps = transcript.steps.len();

        let router = Arc::new(NotificationRouter::new());
        let device = Arc::new(ReplayDevice {
            router: Arc::clone(&router),
            steps: Mutex::new(transcript.steps.into()),
            mismatches: Mutex::new(Vec::new()),
        });
        let config = TransferConfig {
            pacing_ms: 0,
            settle_delay_ms: 0,
            step_delay_ms: 0,
            ..TransferConfig::default()
        };
        let manager = DlcManager::new(Arc::clone(&device), router, config);

        manager.bootstrap().await.unwrap();

        let payload: Vec<u8> = (0..transcript.payload_len).map(|i| i as u8).collect();
        let request = UploadRequest::new(transcript.slot, transcript.filename, payload);
        let report = manager
            .flash_and_activate(request, true, None, &CancellationToken::new())
            .await
            .unwrap();

        let mismatches = device.mismatches.lock().unwrap().clone();
        assert!(mismatches.is_empty(), "transcript diverged:\n{}", mismatches.join("\n"));
        assert!(
            device.steps.lock().unwrap().is_empty(),
            "only some of {total_steps} steps were played"
        );
        assert_eq!(report.bytes, transcript.payload_len);
        assert_eq!(
            manager.registry().state(transcript.slot).unwrap(),
            SlotState::Active
        );
    }
}
