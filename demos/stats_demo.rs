use std::collections::hash_map::DefaultHasher;
use std::hash::Hash;
use std::hash::Hasher;

use clap::Parser;
use index_hash::IndexHashTable;

#[derive(Parser, Debug)]
struct Args {
    #[arg(short = 'c', long = "expected_entries", default_value_t = 1000)]
    expected_entries: u32,

    /// Keep inserting past the presized capacity to watch the table grow.
    #[arg(short = 'g', long = "grow_to")]
    grow_to: Option<u32>,
}

fn hash_u32(value: u32) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

fn main() {
    let args = Args::parse();

    println!(
        "Building IndexHashTable for {} expected entries",
        args.expected_entries
    );

    let mut table = IndexHashTable::build(args.expected_entries);

    println!(
        "Official size: {}, capacity: {}, probe overflow: {}",
        table.official_size(),
        table.capacity(),
        table.probe_overflow_size()
    );

    let target = args.grow_to.unwrap_or(table.capacity() as u32);
    let mut growths = 0;
    for index in 0..target {
        let official_size = table.official_size();
        table.insert_unconditional(hash_u32(index), index, hash_u32);
        if table.official_size() != official_size {
            growths += 1;
            println!(
                "Grew from {} to {} buckets at index {}",
                official_size,
                table.official_size(),
                index
            );
        }
    }

    println!("Inserted {} indices ({} growths)", table.len(), growths);
    println!(
        "Final load factor: {:.2}%",
        (table.len() as f64 / table.capacity().max(1) as f64) * 100.0
    );

    table.print_probe_histogram();
    table.debug_stats().print();

    table.demolish();
}
