/// CLI for the ChainShare daemon control API
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::time::Duration;

const DEFAULT_API_PORT: u16 = 7425;

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    let command = &args[1];

    match command.as_str() {
        "status" => {
            let resp = request(serde_json::json!({ "command": "status" }))?;
            print_status(&resp);
        }
        "ping" => {
            let resp = request(serde_json::json!({ "command": "ping" }))?;
            print_ok_or_fail(&resp, "Daemon is active");
        }
        "share" => {
            if args.len() < 3 {
                eprintln!("Usage: csctl share <content> [group_id]");
                return Ok(());
            }
            let mut req = serde_json::json!({
                "command": "share",
                "content": args[2],
            });
            if let Some(group) = args.get(3) {
                req["group_id"] = serde_json::json!(group);
            }
            let resp = request(req)?;
            print_ok_or_fail(&resp, "Content shared with group");
            if let Some(warning) = resp["warning"].as_str() {
                eprintln!("  Warning: {}", warning);
            }
        }
        "set-group" => {
            if args.len() < 3 {
                eprintln!("Usage: csctl set-group <group_id>");
                return Ok(());
            }
            let resp = request(serde_json::json!({
                "command": "setGroup",
                "group_id": args[2],
            }))?;
            print_ok_or_fail(&resp, "Group updated");
        }
        "reconnect" => {
            let resp = request(serde_json::json!({ "command": "reconnect" }))?;
            print_ok_or_fail(&resp, "Reconnected successfully");
        }
        "restart-monitoring" => {
            let resp = request(serde_json::json!({ "command": "restartMonitoring" }))?;
            print_ok_or_fail(&resp, "Monitoring restarted");
        }
        "test-notification" => {
            let resp = request(serde_json::json!({ "command": "testNotification" }))?;
            print_ok_or_fail(&resp, "Test notification triggered");
        }
        "test-connection" => {
            let resp = request(serde_json::json!({ "command": "testConnection" }))?;
            print_ok_or_fail(&resp, "Backend connection is working properly");
        }
        "notifications" => {
            let resp = request(serde_json::json!({ "command": "notifications" }))?;
            print_list(&resp, |item| {
                format!(
                    "  [{}] {} - {}",
                    item["id"].as_str().unwrap_or("?"),
                    item["title"].as_str().unwrap_or("?"),
                    item["message"].as_str().unwrap_or("")
                )
            });
        }
        "errors" => {
            let resp = request(serde_json::json!({ "command": "errors" }))?;
            print_list(&resp, |item| {
                format!(
                    "  [{}] {}: {}",
                    item["timestamp"].as_str().unwrap_or("?"),
                    item["source"].as_str().unwrap_or("?"),
                    item["message"].as_str().unwrap_or("")
                )
            });
        }
        "activities" => {
            let resp = request(serde_json::json!({ "command": "activities" }))?;
            print_list(&resp, |item| {
                let mut line = format!(
                    "  {} ({}) shared by {}",
                    item["address"].as_str().unwrap_or("?"),
                    item["chain"].as_str().unwrap_or("?"),
                    item["shared_by"].as_str().unwrap_or("?")
                );
                if let Some(explorer) = item["explorer"].as_str() {
                    line.push_str(&format!("\n    {}", explorer));
                }
                line
            });
        }
        "watch" => {
            let surface = args.get(2).map(String::as_str).unwrap_or("popup");
            watch(surface)?;
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
        }
    }

    Ok(())
}

fn print_usage() {
    println!("ChainShare CLI");
    println!();
    println!("Usage: csctl <command> [args]");
    println!();
    println!("Commands:");
    println!("  status                      Show monitoring status");
    println!("  ping                        Check the daemon is alive");
    println!("  share <content> [group]     Share content with the group");
    println!("  set-group <group_id>        Change the active group");
    println!("  reconnect                   Force a backend reconnect");
    println!("  restart-monitoring          Force a clean monitoring restart");
    println!("  test-notification           Trigger a test notification");
    println!("  test-connection             Run backend connection diagnostics");
    println!("  notifications               List stored notifications");
    println!("  errors                      Show the persisted error log");
    println!("  activities                  List recent clipboard detections");
    println!("  watch [tab|popup]           Attach as a surface and print envelopes");
}

fn api_port() -> u16 {
    std::env::var("CHAINSHARE_API_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_API_PORT)
}

fn connect() -> anyhow::Result<TcpStream> {
    let port = api_port();
    let stream = TcpStream::connect(format!("127.0.0.1:{}", port)).map_err(|e| {
        anyhow::anyhow!(
            "Could not reach the ChainShare daemon on port {}: {} (is chainshared running?)",
            port,
            e
        )
    })?;
    Ok(stream)
}

fn request(req: serde_json::Value) -> anyhow::Result<serde_json::Value> {
    let mut stream = connect()?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    stream.set_write_timeout(Some(Duration::from_secs(5)))?;

    writeln!(stream, "{}", req)?;

    let mut response = String::new();
    BufReader::new(&stream).read_line(&mut response)?;
    Ok(serde_json::from_str(&response)?)
}

fn watch(surface: &str) -> anyhow::Result<()> {
    let mut stream = connect()?;
    writeln!(
        stream,
        "{}",
        serde_json::json!({ "command": "subscribe", "surface": surface })
    )?;

    let reader = BufReader::new(stream);
    println!("Attached as {} surface; waiting for notifications...", surface);
    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<serde_json::Value>(&line) {
            Ok(v) if v.get("action").is_some() => {
                println!("{}", serde_json::to_string_pretty(&v)?);
            }
            Ok(v) => println!("{}", v),
            Err(_) => println!("{}", line),
        }
    }
    Ok(())
}

fn print_ok_or_fail(resp: &serde_json::Value, ok_message: &str) {
    if resp["success"].as_bool().unwrap_or(false) {
        println!("✓ {}", ok_message);
    } else {
        let error = resp["error"].as_str().unwrap_or("Unknown error");
        eprintln!("✗ Error: {}", error);
        std::process::exit(1);
    }
}

fn print_status(resp: &serde_json::Value) {
    if !resp["success"].as_bool().unwrap_or(false) {
        let error = resp["error"].as_str().unwrap_or("Unknown error");
        eprintln!("✗ Error: {}", error);
        std::process::exit(1);
    }
    let data = &resp["data"];
    println!("Pipeline Status:");
    println!("{:-<60}", "");
    println!("  Monitoring active: {}", data["active"]);
    println!("  Poll interval: {} ms", data["interval_ms"]);
    println!("  Last known count: {}", data["last_count"]);
    println!("  Backend initialized: {}", data["initialized"]);
    println!("  Attached tabs: {}  popups: {}", data["tabs"], data["popups"]);
    if let Some(group) = data["group_id"].as_str() {
        println!("  Active group: {}", group);
    }
}

fn print_list(resp: &serde_json::Value, fmt: impl Fn(&serde_json::Value) -> String) {
    if !resp["success"].as_bool().unwrap_or(false) {
        let error = resp["error"].as_str().unwrap_or("Unknown error");
        eprintln!("✗ Error: {}", error);
        std::process::exit(1);
    }
    match resp["data"].as_array() {
        Some(items) if !items.is_empty() => {
            for item in items {
                println!("{}", fmt(item));
            }
        }
        _ => println!("(empty)"),
    }
}
