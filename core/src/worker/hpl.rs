// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! HPL input deck and MPI hostfile rendering.
//!
//! The deck is the standard 31-line `HPL.dat` with the problem size, block
//! size and process grid substituted in; everything else is fixed tuning.
//! Parsing HPL's output is somebody else's job; this module only produces
//! the inputs the launcher consumes.

use std::collections::BTreeMap;

use crate::protocol::HplParams;

/// File name the deck is staged under in every working directory.
pub const DECK_FILE: &str = "HPL.dat";

/// File name of the MPI hostfile, staged next to the deck and kept as an
/// artifact in the result directory.
pub const HOSTFILE: &str = "hostfile.txt";

/// Render the HPL input deck for the given parameters.
pub fn render_deck(params: HplParams) -> String {
    format!(
        "HPLinpack benchmark input file\n\
         Generated by hpc-bench\n\
         HPL.out      output file name (if any)\n\
         6            device out (6=stdout,7=stderr,file)\n\
         1            # of problems sizes (N)\n\
         {n}    Ns\n\
         1            # of NBs\n\
         {nb}         NBs\n\
         0            PMAP process mapping (0=Row-,1=Column-major)\n\
         1            # of process grids (P x Q)\n\
         {p}         Ps\n\
         {q}         Qs\n\
         16.0         threshold\n\
         1            # of panel fact\n\
         2            PFACTs (0=left, 1=Crout, 2=Right)\n\
         1            # of recursive stopping criterium\n\
         4            NBMINs (>= 1)\n\
         1            # of panels in recursion\n\
         2            NDIVs\n\
         1            # of recursive panel fact.\n\
         1            RFACTs (0=left, 1=Crout, 2=Right)\n\
         1            # of broadcast\n\
         1            BCASTs (0=1rg,1=1rM,2=2rg,3=2rM,4=Lng,5=LnM)\n\
         1            # of lookahead depth\n\
         1            DEPTHs (>=0)\n\
         2            SWAP (0=bin-exch,1=long,2=mix)\n\
         64           swapping threshold\n\
         0            L1 in (0=transposed,1=no-transposed) form\n\
         0            U  in (0=transposed,1=no-transposed) form\n\
         1            Equilibration (0=no,1=yes)\n\
         8            memory alignment in double (> 0)\n",
        n = params.n_value,
        nb = params.nb,
        p = params.ps,
        q = params.qs,
    )
}

/// Render the hostfile consumed by the MPI launcher, one `<ip> slots=<n>`
/// line per node in key order.
pub fn render_hostfile(node_slots: &BTreeMap<String, u32>) -> String {
    let mut out = String::new();
    for (ip, slots) in node_slots {
        out.push_str(&format!("{ip} slots={slots}\n"));
    }
    out
}
