// Demo that watches a DotBot fleet through a serial gateway and prints
// robots as they come, move and go quiet.
//
// Usage: fleet-monitor [serial port]

use std::time::Duration;

use dotbot_lib::controller::{Controller, ControllerSettings};
use dotbot_lib::models::{DotBotQuery, NotificationCommand, RgbLedCommand};
use futures::StreamExt;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut settings = ControllerSettings::default();
    if let Some(port) = std::env::args().nth(1) {
        settings.port = port;
    }
    let controller = Controller::start_serial(settings).await?;
    let mut notifications = controller.notifications();

    println!("Watching the fleet, press Ctrl-C to quit");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            notification = notifications.next() => {
                let Some(notification) = notification else { break };
                match notification.cmd {
                    NotificationCommand::Reload => {
                        println!("Fleet changed:");
                        for dotbot in controller.dotbots(&DotBotQuery::default()).await {
                            println!(
                                " - {} {:?} {:?}",
                                dotbot.address, dotbot.application, dotbot.status
                            );
                        }
                    }
                    NotificationCommand::Update => {
                        if let Some(update) = notification.data {
                            if let Some(position) = update.lh2_position {
                                println!(
                                    "{} moved to ({:.3}, {:.3})",
                                    update.address, position.x, position.y
                                );
                            }
                        }
                    }
                }
            }
        }
    }

    // Switch every known LED off before leaving
    for dotbot in controller.dotbots(&DotBotQuery::default()).await {
        let command = RgbLedCommand {
            red: 0,
            green: 0,
            blue: 0,
        };
        let _ = controller.send_rgb_led(dotbot.address, command).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    controller.shutdown().await;
    Ok(())
}
