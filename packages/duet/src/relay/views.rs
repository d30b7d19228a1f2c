use std::collections::BTreeMap;

use duet_protocol::RoomName;
use maud::{DOCTYPE, Markup, PreEscaped, html};

use crate::metrics::MetricsSnapshot;

const CSS: &str = r#"
body { font-family: system-ui, sans-serif; background: #111827; color: #e5e7eb; margin: 2rem; }
h1 { font-size: 1.4rem; }
table { border-collapse: collapse; margin-bottom: 1.5rem; }
td, th { padding: 0.35rem 1rem; border-bottom: 1px solid #374151; text-align: left; }
.num { text-align: right; font-variant-numeric: tabular-nums; }
"#;

pub fn status_page(rooms: &BTreeMap<RoomName, usize>, metrics: &MetricsSnapshot) -> Markup {
    html! {
        (DOCTYPE)
        html {
            head {
                title { "duet relay" }
                meta http-equiv="refresh" content="5";
                style { (PreEscaped(CSS)) }
            }
            body {
                h1 { "duet relay" }
                p { "Up " (metrics.uptime_secs) "s" }

                table {
                    tr { th { "Room" } th { "Members" } }
                    @for (room, count) in rooms {
                        tr {
                            td { (room) }
                            td class="num" { (count) }
                        }
                    }
                }

                table {
                    tr { th { "Counter" } th { "Value" } }
                    tr { td { "Active connections" } td class="num" { (metrics.connections.active) } }
                    tr { td { "Total connections" } td class="num" { (metrics.connections.total) } }
                    tr { td { "Frames received" } td class="num" { (metrics.frames.received) } }
                    tr { td { "Frames forwarded" } td class="num" { (metrics.frames.forwarded) } }
                    tr { td { "Frames dropped" } td class="num" { (metrics.frames.dropped) } }
                    tr { td { "Frames ignored" } td class="num" { (metrics.frames.ignored) } }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::RelayMetrics;

    #[test]
    fn lists_every_room() {
        let rooms: BTreeMap<RoomName, usize> =
            RoomName::ALL.iter().map(|r| (*r, 2)).collect();
        let html = status_page(&rooms, &RelayMetrics::new().snapshot()).into_string();
        assert!(html.contains("soloA"));
        assert!(html.contains("soloB"));
        assert!(html.contains("paired"));
        assert!(html.contains("Frames dropped"));
    }
}
