use super::CheckoutNotice;

/// Subject and bodies of one notification mail
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedEmail {
    pub subject: String,
    pub text: String,
    pub html: String,
}

const OK_COLOR: &str = "#28a745";
const FAIL_COLOR: &str = "#dc3545";

pub fn render(notice: &CheckoutNotice) -> RenderedEmail {
    let turned_off = notice.turned_off();
    let failed = notice.thermostats.len() - turned_off;
    let all_off = failed == 0;

    let heading = if all_off {
        "Thermostats Turned Off"
    } else {
        "Thermostat Warning"
    };
    let subject = format!("{} - {}", heading, notice.property_name);
    let time = notice.event_time.format("%Y-%m-%d %I:%M %p %Z").to_string();

    let status_lines: Vec<String> = notice
        .thermostats
        .iter()
        .map(|t| format!("  - {}: {}", t.name, status_word(t.turned_off)))
        .collect();

    let text = format!(
        "Checkout detected at {}\n\nGuest: {}\nReservation: {}\nTime: {}\n\nThermostat Status:\n{}\n\nSummary: {} turned off, {} failed\n",
        notice.property_name,
        notice.guest_name,
        notice.reservation_id,
        time,
        status_lines.join("\n"),
        turned_off,
        failed,
    );

    let items: String = notice
        .thermostats
        .iter()
        .map(|t| {
            format!(
                "<li style=\"color: {};\">{}: {}</li>",
                if t.turned_off { OK_COLOR } else { FAIL_COLOR },
                escape_html(&t.name),
                status_word(t.turned_off)
            )
        })
        .collect();

    let html = format!(
        r#"<html>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; padding: 20px;">
    <h2 style="color: {color};">{heading}</h2>
    <p><strong>Property:</strong> {property}</p>
    <p><strong>Guest:</strong> {guest}</p>
    <p><strong>Reservation:</strong> {reservation}</p>
    <p><strong>Time:</strong> {time}</p>
    <h3>Thermostat Status:</h3>
    <ul>{items}</ul>
    <p style="color: #666; font-size: 12px; margin-top: 30px;">Sent by Nest Checkout Automation</p>
</body>
</html>
"#,
        color = if all_off { OK_COLOR } else { FAIL_COLOR },
        heading = heading,
        property = escape_html(&notice.property_name),
        guest = escape_html(&notice.guest_name),
        reservation = escape_html(&notice.reservation_id),
        time = time,
        items = items,
    );

    RenderedEmail { subject, text, html }
}

fn status_word(turned_off: bool) -> &'static str {
    if turned_off {
        "OFF"
    } else {
        "FAILED"
    }
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}
