use chrono::Utc;
use clap::Subcommand;
use leaven_core::{Alarm, Database};

#[derive(Subcommand)]
pub enum AlarmsAction {
    /// List stored alarms as JSON
    List {
        /// Only this bake
        bake_id: Option<String>,
        /// Only alarms that are due now
        #[arg(long)]
        due: bool,
    },
}

pub fn run(action: AlarmsAction) -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open()?;

    match action {
        AlarmsAction::List { bake_id, due } => {
            let bake_ids = match bake_id {
                Some(id) => vec![id],
                None => db.list_bakes()?.into_iter().map(|b| b.id).collect(),
            };

            let now = Utc::now();
            let mut alarms: Vec<Alarm> = Vec::new();
            for id in &bake_ids {
                alarms.extend(
                    db.alarms_for(id)?
                        .into_iter()
                        .filter(|a| !due || a.scheduled_time <= now),
                );
            }
            alarms.sort_by(|a, b| a.scheduled_time.cmp(&b.scheduled_time));
            println!("{}", serde_json::to_string_pretty(&alarms)?);
        }
    }
    Ok(())
}
