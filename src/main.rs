use std::{env, path::PathBuf, process};

use avatar_graft::bones::{find_bone, read_bone_snapshot_file, read_full_body_vertices_file};

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:#}");
        process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: avatar-graft <bones.bin>");
        process::exit(2);
    }

    let input = PathBuf::from(&args[1]);
    let bones = read_bone_snapshot_file(&input)?;
    let vertices = read_full_body_vertices_file(&input)?;

    println!("Bones: {}", bones.len());
    println!("Full-body vertices: {}", vertices.len());
    for name in ["Neck", "Head"] {
        match find_bone(&bones, name) {
            Some(bone) => println!(
                "{}: ({:.4}, {:.4}, {:.4})",
                name, bone.position.x, bone.position.y, bone.position.z
            ),
            None => println!("{name}: not present"),
        }
    }

    Ok(())
}
