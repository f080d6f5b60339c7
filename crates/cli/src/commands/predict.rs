//! Predictive capacity commands

use anyhow::Result;
use orchestrator_lib::predictor::{
    CapacityForecast, ForecastRequest, LosPrediction, LosRequest, PatientRequirements,
    PlacementRecommendation, Requirement, SurgeRequest, SurgeStatus,
};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{
    color_status, format_hours, format_pct, format_timestamp, label, print_json, print_table,
    print_warning, OutputFormat,
};

#[derive(Tabled)]
struct ForecastRow {
    #[tabled(rename = "Hour")]
    hour: u32,
    #[tabled(rename = "At")]
    timestamp: String,
    #[tabled(rename = "Census")]
    census: String,
    #[tabled(rename = "Interval")]
    interval: String,
    #[tabled(rename = "Risk")]
    risk: String,
}

#[derive(Tabled)]
struct PlacementRow {
    #[tabled(rename = "Bed")]
    bed: String,
    #[tabled(rename = "Unit")]
    unit: String,
    #[tabled(rename = "Score")]
    score: String,
    #[tabled(rename = "Avail")]
    availability: String,
    #[tabled(rename = "Match")]
    requirements: String,
    #[tabled(rename = "Load")]
    load: String,
    #[tabled(rename = "Turnover")]
    turnover: String,
    #[tabled(rename = "Unit Occ")]
    occupancy: String,
}

pub async fn los(
    client: &ApiClient,
    category: String,
    sigma: Option<f64>,
    format: OutputFormat,
) -> Result<()> {
    let prediction: LosPrediction = client
        .post("predict/los", &LosRequest { category, sigma })
        .await?;

    if format == OutputFormat::Json {
        return print_json(&prediction);
    }

    println!("Category:  {}", prediction.category);
    println!("Predicted: {}", format_hours(prediction.predicted_hours));
    println!(
        "Interval:  {} - {}",
        format_hours(prediction.confidence_interval.lower),
        format_hours(prediction.confidence_interval.upper)
    );
    println!(
        "Source:    {} ({} samples)",
        label(&prediction.source),
        prediction.sample_size
    );
    if prediction.insufficient_history {
        print_warning("Insufficient history, prediction is based on a baseline");
    }
    Ok(())
}

pub async fn forecast(
    client: &ApiClient,
    unit_id: String,
    hours: Option<u32>,
    format: OutputFormat,
) -> Result<()> {
    let forecast: CapacityForecast = client
        .post(
            "predict/forecast",
            &ForecastRequest {
                unit_id,
                horizon_hours: hours,
            },
        )
        .await?;

    if format == OutputFormat::Json {
        return print_json(&forecast);
    }

    println!(
        "Unit {}: {} of {} beds occupied",
        forecast.unit_id, forecast.current_census, forecast.capacity
    );
    let rows = forecast
        .points
        .iter()
        .map(|p| ForecastRow {
            hour: p.hour,
            timestamp: format_timestamp(&p.timestamp),
            census: format!("{:.1}", p.predicted_census),
            interval: format!(
                "{:.1} - {:.1}",
                p.confidence_interval.lower, p.confidence_interval.upper
            ),
            risk: color_status(p.risk_level.as_str()),
        })
        .collect();
    print_table::<ForecastRow>(rows);
    if forecast.insufficient_history {
        print_warning(&format!(
            "Insufficient history ({} admissions), intervals use a fallback spread",
            forecast.sample_size
        ));
    }
    Ok(())
}

pub async fn surge(client: &ApiClient, facility_id: Option<String>, format: OutputFormat) -> Result<()> {
    let status: SurgeStatus = client
        .post("predict/surge", &SurgeRequest { facility_id })
        .await?;

    if format == OutputFormat::Json {
        return print_json(&status);
    }

    println!(
        "Facility:  {}",
        status.facility_id.as_deref().unwrap_or("all")
    );
    println!("Level:     {}", color_status(status.level.as_str()));
    println!(
        "Occupancy: {} ({} of {} beds, {} units)",
        format_pct(status.occupancy_pct),
        status.occupied,
        status.capacity,
        status.units
    );
    println!("Trigger:   {}", status.trigger);
    Ok(())
}

pub struct PlacementArgs {
    pub facility_id: Option<String>,
    pub require: Vec<String>,
    pub prefer: Vec<String>,
    pub limit: Option<usize>,
}

impl From<PlacementArgs> for PatientRequirements {
    fn from(args: PlacementArgs) -> Self {
        let requirements = args
            .require
            .into_iter()
            .map(Requirement::hard)
            .chain(args.prefer.into_iter().map(Requirement::soft))
            .collect();
        PatientRequirements {
            facility_id: args.facility_id,
            requirements,
            limit: args.limit,
        }
    }
}

pub async fn placement(client: &ApiClient, args: PlacementArgs, format: OutputFormat) -> Result<()> {
    let request = PatientRequirements::from(args);
    let recommendations: Vec<PlacementRecommendation> =
        client.post("predict/placement", &request).await?;

    match format {
        OutputFormat::Json => print_json(&recommendations)?,
        OutputFormat::Table => {
            if recommendations.is_empty() {
                print_warning("No bed satisfies the requirements");
                return Ok(());
            }
            let rows = recommendations
                .iter()
                .map(|r| PlacementRow {
                    bed: r.bed_id.clone(),
                    unit: r.unit_id.clone(),
                    score: format!("{:.2}", r.score),
                    availability: format!("{:.2}", r.factors.availability),
                    requirements: format!("{:.2}", r.factors.requirements_match),
                    load: format!("{:.2}", r.factors.load_balance),
                    turnover: format!("{:.2}", r.factors.turnover),
                    occupancy: format_pct(r.unit_occupancy_pct),
                })
                .collect();
            print_table::<PlacementRow>(rows);
        }
    }
    Ok(())
}
