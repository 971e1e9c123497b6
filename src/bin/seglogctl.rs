use seglog::api::v1::log_service_client::LogServiceClient;
use seglog::api::v1::*;

use clap::{Parser, Subcommand};
use tonic::transport::Channel;

pub struct SeglogClient {}

impl SeglogClient {
    pub async fn produce(
        &self,
        conn: &mut LogServiceClient<Channel>,
        value: String,
    ) -> Result<u64, Box<dyn std::error::Error>> {
        let request = tonic::Request::new(ProduceRequest {
            record: Some(Record {
                value: value.into_bytes(),
                offset: 0,
            }),
        });

        let response = conn.produce(request).await?;
        Ok(response.into_inner().offset)
    }

    pub async fn consume(
        &self,
        conn: &mut LogServiceClient<Channel>,
        offset: u64,
    ) -> Result<Record, Box<dyn std::error::Error>> {
        let request = tonic::Request::new(ConsumeRequest { offset });

        let response = conn.consume(request).await?;
        Ok(response.into_inner().record.unwrap_or_default())
    }

    pub async fn produce_stream(
        &self,
        conn: &mut LogServiceClient<Channel>,
        values: Vec<String>,
    ) -> Result<Vec<u64>, Box<dyn std::error::Error>> {
        let requests = values.into_iter().map(|value| ProduceRequest {
            record: Some(Record {
                value: value.into_bytes(),
                offset: 0,
            }),
        });

        let mut stream = conn
            .produce_stream(tokio_stream::iter(requests))
            .await?
            .into_inner();
        let mut offsets = Vec::new();
        while let Some(response) = stream.message().await? {
            offsets.push(response.offset);
        }
        Ok(offsets)
    }

    /// Prints records from `offset` on until the server ends the stream or
    /// the process is interrupted.
    pub async fn tail(
        &self,
        conn: &mut LogServiceClient<Channel>,
        offset: u64,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let request = tonic::Request::new(ConsumeRequest { offset });

        let mut stream = conn.consume_stream(request).await?.into_inner();
        while let Some(response) = stream.message().await? {
            if let Some(record) = response.record {
                print_record(&record);
            }
        }
        Ok(())
    }
}

fn print_record(record: &Record) {
    println!(
        "offset={}, value={}",
        record.offset,
        String::from_utf8_lossy(&record.value)
    );
}

#[derive(Subcommand)]
enum CMD {
    /// Append each value, one request per value
    PRODUCE { values: Vec<String> },
    /// Append all values over a single stream
    STREAM { values: Vec<String> },
    /// Read one record
    CONSUME { offset: u64 },
    /// Follow the log from an offset
    TAIL { offset: u64 },
}

#[derive(Parser)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Args {
    /// Server Host
    #[clap(short = 'H', long, default_value_t = String::from("127.0.0.1"))]
    host: String,

    /// Server Port
    #[clap(short, long, default_value_t = 20001)]
    port: u16,

    /// Command: produce, stream, consume, tail
    #[command(subcommand)]
    cmd: CMD,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut conn = LogServiceClient::connect(format!("http://{}:{}", args.host, args.port)).await?;

    let client = SeglogClient {};

    match args.cmd {
        CMD::PRODUCE { values } => {
            for value in values {
                match client.produce(&mut conn, value).await {
                    Ok(offset) => println!("offset={}", offset),
                    Err(e) => println!("Produce runs in error: {:?}", e),
                }
            }
        }
        CMD::STREAM { values } => match client.produce_stream(&mut conn, values).await {
            Ok(offsets) => println!("offsets={:?}", offsets),
            Err(e) => println!("Produce stream runs in error: {:?}", e),
        },
        CMD::CONSUME { offset } => match client.consume(&mut conn, offset).await {
            Ok(record) => print_record(&record),
            Err(e) => println!("Consume runs in error: {:?}", e),
        },
        CMD::TAIL { offset } => {
            if let Err(e) = client.tail(&mut conn, offset).await {
                println!("Tail runs in error: {:?}", e);
            }
        }
    }
    Ok(())
}
